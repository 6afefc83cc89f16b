//! Integration tests for attachment uploads linked to records.

use keepsake_core::{catalog, Clock, NewRecord};
use keepsake_sync::{
    AttachmentConfig, AttachmentFile, AttachmentLinker, AttachmentPipeline, BatchStatus,
    CompressionConfig, InjectedFault, MemoryObjectStore, ObjectStore, StaticAuth, SyncError,
};
use keepsake_testkit::TestStore;
use std::sync::Arc;

fn photos(n: usize) -> Vec<AttachmentFile> {
    (1..=n)
        .map(|i| AttachmentFile::new(format!("photo {i}.txt"), vec![b'x'; 16 * i]))
        .collect()
}

fn pipeline(remote: &Arc<MemoryObjectStore>, fixture: &TestStore) -> AttachmentPipeline {
    AttachmentPipeline::new(
        AttachmentConfig::default().with_compression(CompressionConfig::disabled()),
        Arc::new(StaticAuth::new("token")),
    )
    .with_remote(remote.clone() as Arc<dyn ObjectStore>)
    .with_clock(fixture.clock.shared())
}

#[test]
fn six_files_over_cap_make_no_calls() {
    let fixture = TestStore::memory();
    let conn = fixture.connect_standard();
    let meals = conn.collection(catalog::MEALS).unwrap();
    let id = meals.add(NewRecord::new("u")).unwrap();
    let remote = Arc::new(MemoryObjectStore::new());
    let pipeline = pipeline(&remote, &fixture);

    let err = AttachmentLinker::new(&pipeline)
        .attach(&meals, &id, &photos(6))
        .unwrap_err();

    assert!(matches!(err, SyncError::ValidationFailed { .. }));
    assert_eq!(remote.network_calls(), 0);
    assert!(!meals
        .get(&id)
        .unwrap()
        .unwrap()
        .payload
        .contains_key(catalog::ATTACHMENTS_FIELD));
}

#[test]
fn second_file_failing_gives_partial_with_two_descriptors() {
    let fixture = TestStore::memory();
    let conn = fixture.connect_standard();
    let meals = conn.collection(catalog::MEALS).unwrap();
    let id = meals.add(NewRecord::new("u")).unwrap();
    let remote = Arc::new(MemoryObjectStore::new());
    remote.fail_put(2, InjectedFault::Remote);
    let pipeline = pipeline(&remote, &fixture);
    let linker = AttachmentLinker::new(&pipeline);

    let report = linker.attach(&meals, &id, &photos(3)).unwrap();

    assert_eq!(
        report.status(),
        BatchStatus::Partial {
            succeeded: 2,
            failed: 1
        }
    );
    assert_eq!(report.failures[0].name, "photo 2.txt");
    let stored = linker.attachments(&meals, &id).unwrap();
    let names: Vec<_> = stored.iter().map(|d| d.original_name.as_str()).collect();
    assert_eq!(names, ["photo 1.txt", "photo 3.txt"]);
    for descriptor in &stored {
        assert!(descriptor
            .remote_name
            .starts_with(&format!("attachments/meals/{id}/")));
        assert!(descriptor.remote_name.ends_with(&descriptor.original_name.replace(' ', "_")));
        assert_eq!(descriptor.uploaded_at, fixture.clock.now_millis());
    }
}

#[test]
fn existing_attachments_count_against_the_cap() {
    let fixture = TestStore::memory();
    let conn = fixture.connect_standard();
    let meals = conn.collection(catalog::MEALS).unwrap();
    let id = meals.add(NewRecord::new("u")).unwrap();
    let remote = Arc::new(MemoryObjectStore::new());
    let pipeline = pipeline(&remote, &fixture);
    let linker = AttachmentLinker::new(&pipeline);

    linker.attach(&meals, &id, &photos(4)).unwrap();
    let calls = remote.network_calls();
    let err = linker.attach(&meals, &id, &photos(2)).unwrap_err();
    assert!(matches!(err, SyncError::ValidationFailed { .. }));
    assert_eq!(remote.network_calls(), calls);

    let report = linker.attach(&meals, &id, &photos(1)).unwrap();
    assert!(report.is_complete());
    assert_eq!(linker.attachments(&meals, &id).unwrap().len(), 5);
}

#[test]
fn detach_removes_remote_object_and_descriptor() {
    let fixture = TestStore::memory();
    let conn = fixture.connect_standard();
    let meals = conn.collection(catalog::MEALS).unwrap();
    let id = meals.add(NewRecord::new("u")).unwrap();
    let remote = Arc::new(MemoryObjectStore::new());
    let pipeline = pipeline(&remote, &fixture);
    let linker = AttachmentLinker::new(&pipeline);

    let report = linker.attach(&meals, &id, &photos(2)).unwrap();
    let first = report.descriptors[0].clone();

    assert!(linker.detach(&meals, &id, &first.id).unwrap());
    assert!(!remote.contains(&first.remote_name));
    assert!(!linker.detach(&meals, &id, &first.id).unwrap());
    assert_eq!(linker.attachments(&meals, &id).unwrap().len(), 1);
}

#[test]
fn attachments_survive_reopen() {
    let fixture = TestStore::file();
    let remote = Arc::new(MemoryObjectStore::new());
    let id = {
        let conn = fixture.connect_standard();
        let meals = conn.collection(catalog::MEALS).unwrap();
        let id = meals.add(NewRecord::new("u")).unwrap();
        let pipeline = pipeline(&remote, &fixture);
        AttachmentLinker::new(&pipeline)
            .attach(&meals, &id, &photos(1))
            .unwrap();
        id
    };

    let fixture = fixture.reopen();
    let conn = fixture.store.connect_current().unwrap();
    let meals = conn.collection(catalog::MEALS).unwrap();
    let pipeline = pipeline(&remote, &fixture);
    let stored = AttachmentLinker::new(&pipeline)
        .attachments(&meals, &id)
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert!(remote.contains(&stored[0].remote_name));
    assert!(pipeline.access_url(&stored[0].remote_name).is_ok());
}

#[test]
fn missing_record_is_a_store_error() {
    let fixture = TestStore::memory();
    let conn = fixture.connect_standard();
    let meals = conn.collection(catalog::MEALS).unwrap();
    let remote = Arc::new(MemoryObjectStore::new());
    let pipeline = pipeline(&remote, &fixture);

    let err = AttachmentLinker::new(&pipeline)
        .attach(&meals, "nope", &photos(1))
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Store(keepsake_core::CoreError::NotFound { .. })
    ));
    assert_eq!(remote.network_calls(), 0);
}
