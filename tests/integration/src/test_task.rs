//! End-to-end remediation runs through both schedulers.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use rekey_core::RenameOutcome;
    use rekey_core::audit::MemoryAuditSink;
    use rekey_core::mapper::{KeyMapper, ReversedIdMapper};
    use rekey_core::scheduler::{ProcessTaskQueue, TaskProcessor};
    use rekey_core::store::{BucketOptions, ObjectStore};
    use rekey_core::task::RemediationTask;

    use crate::{cleanup_bucket, create_test_bucket, list_keys, put_object, remediation_bucket, s3_client};

    const KEYS: [&str; 4] = [
        "12887301/v1/content/data/400171130.lfs",
        "12887302/v1/content/data/400171131.lfs",
        "3037/8821/12887303/v1/content/data/400171132.lfs",
        "101062745/v00001/content/data/400094393.jp2",
    ];

    const EXPECTED: [&str; 4] = [
        "1037/8821/12887301/v1/content/data/400171130.lfs",
        "2037/8821/12887302/v1/content/data/400171131.lfs",
        "3037/8821/12887303/v1/content/data/400171132.lfs",
        "5472/6010/101062745/v00001/content/data/400094393.jp2",
    ];

    async fn seed(client: &aws_sdk_s3::Client, bucket: &str) {
        for key in KEYS {
            put_object(client, bucket, key, key.as_bytes().to_vec()).await;
        }
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_remediate_bucket_with_iterating_scheduler() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "iterate").await;
        seed(&client, &bucket).await;

        let options = BucketOptions::builder().max_keys(2).build();
        let listing = remediation_bucket(&client, &bucket, options);
        let mapper: Arc<dyn KeyMapper> = Arc::new(ReversedIdMapper::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let tasks = listing.pages().filter_map(|page| {
            let task = page.ok().map(|objects| {
                RemediationTask::new(
                    remediation_bucket(&client, &bucket, options),
                    Arc::clone(&mapper),
                    audit.clone(),
                    objects,
                )
            });
            std::future::ready(task)
        });
        let summary = TaskProcessor::new(2, Duration::from_secs(15))
            .run(tasks, |_| {})
            .await;

        // Renamed keys may show up again on later pages; they map to AlreadyCorrect.
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.completed, summary.submitted);
        assert_eq!(list_keys(&client, &bucket).await, EXPECTED);
        assert!(audit.len() >= KEYS.len());
        assert_eq!(
            audit.outcomes_for("3037/8821/12887303/v1/content/data/400171132.lfs"),
            vec![RenameOutcome::AlreadyCorrect]
        );

        listing.close();
        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_remediate_bucket_with_queue_scheduler() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "queue").await;
        seed(&client, &bucket).await;

        let options = BucketOptions::builder().max_keys(1).build();
        let listing = remediation_bucket(&client, &bucket, options);
        let mapper: Arc<dyn KeyMapper> = Arc::new(ReversedIdMapper::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let queue = ProcessTaskQueue::new(2, 8, |_| {});

        let mut pages = listing.pages();
        while let Some(page) = pages.next().await {
            let task = RemediationTask::new(
                remediation_bucket(&client, &bucket, options),
                Arc::clone(&mapper),
                audit.clone(),
                page.expect("page"),
            );
            queue.submit(task).await.expect("submit");
        }
        queue.close();
        let summary = queue.wait().await;

        assert_eq!(summary.failed, 0);
        assert_eq!(summary.completed, summary.submitted);
        assert_eq!(list_keys(&client, &bucket).await, EXPECTED);
        assert!(
            audit
                .records()
                .iter()
                .all(|r| matches!(r.outcome, RenameOutcome::Success | RenameOutcome::AlreadyCorrect))
        );

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_be_idempotent_across_runs() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "rerun").await;
        seed(&client, &bucket).await;
        let mapper: Arc<dyn KeyMapper> = Arc::new(ReversedIdMapper::new());

        for _ in 0..2 {
            let listing = remediation_bucket(&client, &bucket, BucketOptions::default());
            let audit = Arc::new(MemoryAuditSink::new());
            let tasks = listing.pages().filter_map(|page| {
                std::future::ready(page.ok().map(|objects| {
                    RemediationTask::new(
                        remediation_bucket(&client, &bucket, BucketOptions::default()),
                        Arc::clone(&mapper),
                        audit.clone(),
                        objects,
                    )
                }))
            });
            TaskProcessor::new(4, Duration::from_secs(15))
                .run(tasks, |_| {})
                .await;
            assert_eq!(list_keys(&client, &bucket).await, EXPECTED);
        }

        cleanup_bucket(&client, &bucket).await;
    }
}
