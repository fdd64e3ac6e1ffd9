use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use shortlink_core::{OwnerId, ShortCode};
use shortlink_generator::{RandomGenerator, SequenceGenerator};
use shortlink_storage::{
    LinkEvent, LogFileRepository, ReadRepository, Repository, ShortLinkRecord, StorageError,
};

fn owner(value: &str) -> OwnerId {
    OwnerId::from(value)
}

fn journal_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}

async fn snapshot(repo: &LogFileRepository, codes: &[ShortCode]) -> Vec<Option<ShortLinkRecord>> {
    let mut records = Vec::new();
    for code in codes {
        records.push(repo.get(code).await.unwrap());
    }
    records
}

#[tokio::test]
async fn reopened_journal_matches_the_state_before_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    let generator = SequenceGenerator::with_prefix("lf");

    let (codes, before, listed_before) = {
        let repo = LogFileRepository::open(&path).unwrap();
        let mut codes = Vec::new();
        for i in 0..4 {
            let saved = repo
                .save(&format!("https://{i}.example"), &owner("user1"), &generator)
                .await
                .unwrap();
            codes.push(saved.into_code());
        }
        let other = repo
            .save("https://0.example", &owner("user2"), &generator)
            .await
            .unwrap();
        codes.push(other.into_code());

        repo.delete(&codes[1..2], &owner("user1")).await.unwrap();
        // Revive the deleted url under a new code.
        let revived = repo
            .save("https://1.example", &owner("user1"), &generator)
            .await
            .unwrap();
        codes.push(revived.into_code());

        let before = snapshot(&repo, &codes).await;
        let listed = repo.list_by_owner(&owner("user1")).await.unwrap();
        repo.close().await.unwrap();
        (codes, before, listed)
    };

    let repo = LogFileRepository::open(&path).unwrap();

    assert_eq!(snapshot(&repo, &codes).await, before);
    assert_eq!(
        repo.list_by_owner(&owner("user1")).await.unwrap(),
        listed_before
    );
    // Dedup state survives too.
    let again = repo
        .save("https://1.example", &owner("user1"), &generator)
        .await
        .unwrap();
    assert!(again.is_conflict());
    assert_eq!(again.code(), &codes[5]);
}

#[tokio::test]
async fn missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");

    let repo = LogFileRepository::open(&path).unwrap();

    assert!(repo
        .list_by_owner(&owner("user1"))
        .await
        .unwrap()
        .is_empty());
    assert!(path.exists());
    assert!(journal_lines(&path).is_empty());
}

#[tokio::test]
async fn torn_tail_is_dropped_and_appends_resume_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    let generator = SequenceGenerator::with_prefix("lf");

    let code = {
        let repo = LogFileRepository::open(&path).unwrap();
        let code = repo
            .save("https://kept.example", &owner("user1"), &generator)
            .await
            .unwrap()
            .into_code();
        repo.close().await.unwrap();
        code
    };

    // Simulate a crash in the middle of writing the next event.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"uuid":"5f0c","code":"lf0000"#).unwrap();
    drop(file);

    let repo = LogFileRepository::open(&path).unwrap();
    assert_eq!(journal_lines(&path).len(), 1);
    assert!(repo.get(&code).await.unwrap().is_some());

    repo.save("https://next.example", &owner("user1"), &generator)
        .await
        .unwrap();

    let lines = journal_lines(&path);
    assert_eq!(lines.len(), 2);
    for line in &lines {
        serde_json::from_str::<LinkEvent>(line).unwrap();
    }
}

#[tokio::test]
async fn complete_event_without_newline_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    std::fs::write(
        &path,
        r#"{"uuid":"00000000-0000-0000-0000-000000000001","code":"AbC12345","original_url":"https://hello.world","owner_id":"user1","deleted":false}"#,
    )
    .unwrap();

    let repo = LogFileRepository::open(&path).unwrap();
    let code = ShortCode::new("AbC12345").unwrap();
    assert_eq!(
        repo.get(&code).await.unwrap().unwrap().original_url,
        "https://hello.world"
    );

    repo.delete(&[code.clone()], &owner("user1")).await.unwrap();
    let lines = journal_lines(&path);
    assert_eq!(lines.len(), 2);
    assert!(serde_json::from_str::<LinkEvent>(&lines[1]).unwrap().deleted);
}

#[test]
fn corrupt_line_in_the_middle_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"uuid":"00000000-0000-0000-0000-000000000001","code":"AbC12345","original_url":"https://a.example","owner_id":"user1","deleted":false}"#,
            "\n",
            "not json\n",
            r#"{"uuid":"00000000-0000-0000-0000-000000000002","code":"XyZ98765","original_url":"https://b.example","owner_id":"user1","deleted":false}"#,
            "\n",
        ),
    )
    .unwrap();

    let err = LogFileRepository::open(&path).unwrap_err();

    match err {
        StorageError::InvalidData(message) => assert!(message.contains(":2:"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn replay_tolerates_duplicate_and_orphan_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    let created = r#"{"uuid":"00000000-0000-0000-0000-000000000001","code":"AbC12345","original_url":"https://a.example","owner_id":"user1","deleted":false}"#;
    let deleted = r#"{"uuid":"00000000-0000-0000-0000-000000000002","code":"AbC12345","original_url":"https://a.example","owner_id":"user1","deleted":true}"#;
    let orphan = r#"{"uuid":"00000000-0000-0000-0000-000000000003","code":"XyZ98765","original_url":"https://b.example","owner_id":"user2","deleted":true}"#;
    std::fs::write(
        &path,
        format!("{created}\n{created}\n{deleted}\n{deleted}\n{orphan}\n"),
    )
    .unwrap();

    let repo = LogFileRepository::open(&path).unwrap();

    let first = repo
        .get(&ShortCode::new("AbC12345").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(first.deleted);
    let tombstone = repo
        .get(&ShortCode::new("XyZ98765").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(tombstone.deleted);
    assert!(repo
        .list_by_owner(&owner("user1"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn compaction_keeps_one_event_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    let generator = SequenceGenerator::with_prefix("lf");

    let repo = LogFileRepository::open(&path).unwrap();
    let mut codes = Vec::new();
    for i in 0..3 {
        let saved = repo
            .save(&format!("https://{i}.example"), &owner("user1"), &generator)
            .await
            .unwrap();
        codes.push(saved.into_code());
    }
    repo.delete(&codes[..2], &owner("user1")).await.unwrap();
    assert_eq!(journal_lines(&path).len(), 5);

    repo.compact().unwrap();
    assert_eq!(journal_lines(&path).len(), 3);

    // The journal stays writable after the rename.
    repo.save("https://3.example", &owner("user1"), &generator)
        .await
        .unwrap();
    let before = snapshot(&repo, &codes).await;
    repo.close().await.unwrap();
    drop(repo);

    let reopened = LogFileRepository::open(&path).unwrap();
    assert_eq!(journal_lines(&path).len(), 4);
    assert_eq!(snapshot(&reopened, &codes).await, before);
    let listed: Vec<String> = reopened
        .list_by_owner(&owner("user1"))
        .await
        .unwrap()
        .into_iter()
        .map(|link| link.original_url)
        .collect();
    assert_eq!(listed, vec!["https://2.example", "https://3.example"]);
}

#[tokio::test]
async fn save_dropped_before_polling_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    let repo = LogFileRepository::open(&path).unwrap();
    let generator = SequenceGenerator::with_prefix("lf");

    let user1 = owner("user1");
    let pending = repo.save("https://never.example", &user1, &generator);
    drop(pending);

    assert!(repo
        .list_by_owner(&owner("user1"))
        .await
        .unwrap()
        .is_empty());
    assert!(journal_lines(&path).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_saves_leave_journal_and_memory_in_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.jsonl");
    let repo = Arc::new(LogFileRepository::open(&path).unwrap());
    let generator = Arc::new(RandomGenerator::new());

    for i in 0..32 {
        let task_repo = Arc::clone(&repo);
        let task_generator = Arc::clone(&generator);
        let handle = tokio::spawn(async move {
            task_repo
                .save(
                    &format!("https://{i}.example"),
                    &OwnerId::from("user1"),
                    task_generator.as_ref(),
                )
                .await
        });
        if i % 2 == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;
    }

    let live = repo.list_by_owner(&owner("user1")).await.unwrap();
    assert_eq!(journal_lines(&path).len(), live.len());
    repo.close().await.unwrap();

    let replayed = LogFileRepository::open(&path).unwrap();
    assert_eq!(replayed.list_by_owner(&owner("user1")).await.unwrap(), live);
}
