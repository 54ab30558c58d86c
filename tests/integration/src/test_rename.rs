//! Rename protocol tests against a live endpoint.

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use rekey_core::RenameOutcome;
    use rekey_core::etag::multipart_part_count;
    use rekey_core::store::{BucketOptions, ObjectStore};

    use crate::{
        MIN_PART_SIZE, cleanup_bucket, create_test_bucket, get_object, list_keys, put_object,
        remediation_bucket, s3_client,
    };

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_rename_small_object() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "rename").await;
        let source = put_object(&client, &bucket, "12887301/v1/content/data/400171130.lfs", b"payload".to_vec()).await;

        let store = remediation_bucket(&client, &bucket, BucketOptions::default());
        let outcome = store
            .rename(&source, "1037/8821/12887301/v1/content/data/400171130.lfs")
            .await;

        assert_eq!(outcome, RenameOutcome::Success);
        assert_eq!(
            list_keys(&client, &bucket).await,
            vec!["1037/8821/12887301/v1/content/data/400171130.lfs".to_owned()]
        );
        assert_eq!(
            get_object(&client, &bucket, "1037/8821/12887301/v1/content/data/400171130.lfs").await,
            b"payload"
        );

        store.close();
        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_rename_key_needing_escape() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "escape").await;
        let source = put_object(&client, &bucket, "55/v1/my file+1.txt", b"x".to_vec()).await;

        let store = remediation_bucket(&client, &bucket, BucketOptions::default());
        assert_eq!(
            store.rename(&source, "5000/0000/55/v1/my file+1.txt").await,
            RenameOutcome::Success
        );
        assert_eq!(
            list_keys(&client, &bucket).await,
            vec!["5000/0000/55/v1/my file+1.txt".to_owned()]
        );

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_rename_large_object_with_part_copies() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "multipart").await;
        let data: Vec<u8> = (0..(2 * MIN_PART_SIZE + 1024)).map(|i| (i % 251) as u8).collect();
        let source = put_object(&client, &bucket, "12887301/v1/big.bin", data.clone()).await;

        let options = BucketOptions::builder()
            .max_part_size(MIN_PART_SIZE)
            .multipart_threshold(MIN_PART_SIZE)
            .build();
        let store = remediation_bucket(&client, &bucket, options);
        assert_eq!(
            store.rename(&source, "1037/8821/12887301/v1/big.bin").await,
            RenameOutcome::Success
        );

        let head = client
            .head_object()
            .bucket(&bucket)
            .key("1037/8821/12887301/v1/big.bin")
            .send()
            .await
            .expect("head renamed object");
        assert_eq!(head.e_tag().and_then(multipart_part_count), Some(3));
        assert_eq!(get_object(&client, &bucket, "1037/8821/12887301/v1/big.bin").await, data);
        assert_eq!(list_keys(&client, &bucket).await.len(), 1);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_skip_large_object_when_multipart_disabled() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "skip").await;
        let source = put_object(&client, &bucket, "77/big.bin", vec![7; 2048]).await;

        let options = BucketOptions::builder()
            .multipart_threshold(1024)
            .skip_multipart(true)
            .build();
        let store = remediation_bucket(&client, &bucket, options);
        assert_eq!(store.rename(&source, "7000/0000/77/big.bin").await, RenameOutcome::Skipped);
        assert_eq!(list_keys(&client, &bucket).await, vec!["77/big.bin".to_owned()]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_missing_source_as_client_error() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "missing").await;
        let source = put_object(&client, &bucket, "88/a.txt", b"a".to_vec()).await;
        client
            .delete_object()
            .bucket(&bucket)
            .key("88/a.txt")
            .send()
            .await
            .expect("delete source");

        let store = remediation_bucket(&client, &bucket, BucketOptions::default());
        assert_eq!(store.rename(&source, "8000/0000/88/a.txt").await, RenameOutcome::ClientError);
        assert!(list_keys(&client, &bucket).await.is_empty());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_page_through_listing() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "list").await;
        for i in 0..7 {
            put_object(&client, &bucket, &format!("{i}/obj"), vec![1]).await;
        }

        let options = BucketOptions::builder().max_keys(3).build();
        let store = remediation_bucket(&client, &bucket, options);
        let pages: Vec<_> = store.pages().try_collect().await.expect("pages");
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        assert_eq!(store.count().await.expect("count"), 7);

        cleanup_bucket(&client, &bucket).await;
    }
}
