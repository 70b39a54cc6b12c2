mod support;

use chrono::{Duration, Utc};

use lakeflow::error::ErrorKind;
use lakeflow::orchestrator::RunTrigger;
use lakeflow::store::ObjectStore;
use lakeflow::types::EntityKind;
use lakeflow::watermark::Watermark;

use support::{raw_customer, raw_order, raw_product, TestPipeline};

#[tokio::test(flavor = "multi_thread")]
async fn inserted_order_is_enriched_and_merged() {
    let pipeline = TestPipeline::new();
    pipeline.reference.insert_customer("C1", "Acme", "US-East").await;
    pipeline
        .seed_batch(
            EntityKind::Order,
            "batch-1",
            &[raw_order("O1", "C1", 42.50)],
            Utc::now() - Duration::minutes(5),
        )
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap();

    assert_eq!(report.batches_read, 1);
    assert!(report.rows_merged.contains(&(EntityKind::Order, 1)));

    let rows = pipeline.staged_rows(EntityKind::Order).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["orderid"], serde_json::json!("O1"));
    assert_eq!(rows[0]["customer_region"], serde_json::json!("US-East"));
    assert_eq!(rows[0]["customer_name"], serde_json::json!("Acme"));
    assert_eq!(rows[0]["totalamount"], serde_json::json!(42.5));
}

#[tokio::test(flavor = "multi_thread")]
async fn latest_capture_per_key_reaches_the_merge() {
    let pipeline = TestPipeline::new();
    let now = Utc::now();
    pipeline
        .seed_batch(
            EntityKind::Product,
            "batch-1",
            &[raw_product("P1", "Widget", 9.99, 5.0)],
            now - Duration::minutes(10),
        )
        .await;
    pipeline
        .seed_batch(
            EntityKind::Product,
            "batch-2",
            &[raw_product("P1", "Widget", 9.99, 80.0)],
            now - Duration::minutes(5),
        )
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap();
    assert!(report.rows_merged.contains(&(EntityKind::Product, 1)));

    let rows = pipeline.staged_rows(EntityKind::Product).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["stocklevel"], serde_json::json!(80));
}

#[tokio::test(flavor = "multi_thread")]
async fn first_run_scans_only_the_default_lookback() {
    let pipeline = TestPipeline::new();
    let now = Utc::now();
    pipeline
        .seed_batch(
            EntityKind::Order,
            "ancient",
            &[raw_order("O-old", "C1", 1.0)],
            now - Duration::hours(25),
        )
        .await;
    pipeline
        .seed_batch(
            EntityKind::Order,
            "recent",
            &[raw_order("O-new", "C1", 2.0)],
            now - Duration::minutes(5),
        )
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap();

    assert_eq!(report.batches_read, 1);
    let rows = pipeline.staged_rows(EntityKind::Order).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["orderid"], serde_json::json!("O-new"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_customer_still_merges_with_empty_region() {
    let pipeline = TestPipeline::new();
    pipeline
        .seed_batch(
            EntityKind::Order,
            "batch-1",
            &[raw_order("O1", "C-unknown", 10.0)],
            Utc::now() - Duration::minutes(5),
        )
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap();
    assert!(report.rows_merged.contains(&(EntityKind::Order, 1)));

    let rows = pipeline.staged_rows(EntityKind::Order).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["customer_region"], serde_json::json!(""));
    assert_eq!(rows[0]["customer_name"], serde_json::json!(""));
}

#[tokio::test(flavor = "multi_thread")]
async fn reprocessing_the_same_window_stages_the_same_rows() {
    let pipeline = TestPipeline::new();
    pipeline.reference.insert_customer("C1", "Acme", "US-East").await;
    let now = Utc::now();
    pipeline
        .seed_batch(
            EntityKind::Order,
            "batch-1",
            &[raw_order("O1", "C1", 42.5), raw_order("O2", "C1", 7.0)],
            now - Duration::minutes(10),
        )
        .await;
    pipeline
        .seed_batch(
            EntityKind::Customer,
            "batch-1",
            &[raw_customer("C1", "Acme", "US-East")],
            now - Duration::minutes(9),
        )
        .await;

    let orchestrator = pipeline.orchestrator();
    orchestrator.run(RunTrigger::Scheduled).await.unwrap();
    let first_orders = pipeline.staged_rows(EntityKind::Order).await;
    let first_customers = pipeline.staged_rows(EntityKind::Customer).await;

    // Forget the watermark so the next run rescans the same window.
    pipeline
        .store
        .delete(&pipeline.config.watermark_key)
        .await
        .unwrap();
    orchestrator.run(RunTrigger::Scheduled).await.unwrap();

    let all_orders = pipeline.staged_rows(EntityKind::Order).await;
    let second_orders = &all_orders[first_orders.len()..];
    let all_customers = pipeline.staged_rows(EntityKind::Customer).await;
    let second_customers = &all_customers[first_customers.len()..];

    assert_eq!(
        sorted_without_processing_time(&first_orders),
        sorted_without_processing_time(second_orders)
    );
    assert_eq!(
        sorted_without_processing_time(&first_customers),
        sorted_without_processing_time(second_customers)
    );
}

fn sorted_without_processing_time(rows: &[serde_json::Value]) -> Vec<serde_json::Value> {
    let mut stripped: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.as_object_mut()
                .expect("staged row is an object")
                .remove("processing_timestamp");
            row
        })
        .collect();
    stripped.sort_by_key(|row| row.to_string());
    stripped
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_run_advances_the_watermark_to_the_newest_batch() {
    let pipeline = TestPipeline::new();
    let newest = Utc::now() - Duration::minutes(5);
    pipeline
        .seed_batch(
            EntityKind::Order,
            "older",
            &[raw_order("O1", "C1", 1.0)],
            newest - Duration::minutes(30),
        )
        .await;
    pipeline
        .seed_batch(EntityKind::Order, "newest", &[raw_order("O2", "C1", 2.0)], newest)
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap();
    assert_eq!(report.watermark, Some(newest));

    let stored = pipeline
        .store
        .object(&pipeline.config.watermark_key)
        .await
        .expect("watermark written");
    let watermark: Watermark = serde_json::from_slice(&stored).unwrap();
    assert_eq!(watermark.last_processed_time, newest);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merge_leaves_the_watermark_and_no_staging_debris() {
    let pipeline = TestPipeline::new();
    let before = Watermark {
        last_processed_time: Utc::now() - Duration::hours(2),
        updated_at: Utc::now() - Duration::hours(2),
    };
    pipeline
        .store
        .put(
            &pipeline.config.watermark_key,
            serde_json::to_vec(&before).unwrap(),
        )
        .await
        .unwrap();
    pipeline
        .seed_batch(
            EntityKind::Order,
            "batch-1",
            &[raw_order("O1", "C1", 1.0)],
            Utc::now() - Duration::minutes(5),
        )
        .await;
    pipeline
        .executor
        .fail_when_contains("MERGE INTO", "ICEBERG_COMMIT_ERROR")
        .await;

    let err = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryExecutionFailed);

    let stored = pipeline
        .store
        .object(&pipeline.config.watermark_key)
        .await
        .expect("watermark still present");
    let after: Watermark = serde_json::from_slice(&stored).unwrap();
    assert_eq!(after.last_processed_time, before.last_processed_time);

    let staging_keys: Vec<_> = pipeline
        .store
        .keys()
        .await
        .into_iter()
        .filter(|key| key.starts_with(&pipeline.config.staging_prefix))
        .collect();
    assert!(staging_keys.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn query_timeout_aborts_the_run_without_a_watermark() {
    let pipeline = TestPipeline::new();
    pipeline
        .seed_batch(
            EntityKind::Order,
            "batch-1",
            &[raw_order("O1", "C1", 1.0)],
            Utc::now() - Duration::minutes(5),
        )
        .await;
    pipeline.executor.never_complete().await;

    let err = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryTimeout);
    assert!(pipeline
        .store
        .object(&pipeline.config.watermark_key)
        .await
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn event_triggered_runs_process_named_batches_without_advancing() {
    let pipeline = TestPipeline::new();
    // Seeded well behind any watermark window to prove the key list, not the
    // timestamps, selects the batches.
    let key = pipeline
        .seed_batch(
            EntityKind::Product,
            "arrival",
            &[raw_product("P1", "Widget", 9.99, 80.0)],
            Utc::now() - Duration::days(30),
        )
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::BatchArrivals(vec![key]))
        .await
        .unwrap();

    assert_eq!(report.batches_read, 1);
    assert!(report.rows_merged.contains(&(EntityKind::Product, 1)));
    assert!(report.watermark.is_none());
    assert!(pipeline
        .store
        .object(&pipeline.config.watermark_key)
        .await
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_aggregate_refresh_leaves_the_watermark() {
    let pipeline = TestPipeline::new();
    let before = Watermark {
        last_processed_time: Utc::now() - Duration::hours(2),
        updated_at: Utc::now() - Duration::hours(2),
    };
    pipeline
        .store
        .put(
            &pipeline.config.watermark_key,
            serde_json::to_vec(&before).unwrap(),
        )
        .await
        .unwrap();
    pipeline
        .seed_batch(
            EntityKind::Order,
            "batch-1",
            &[raw_order("O1", "C1", 1.0)],
            Utc::now() - Duration::minutes(5),
        )
        .await;
    pipeline
        .executor
        .fail_when_contains("INSERT INTO daily_sales_by_region", "EXHAUSTED")
        .await;

    let err = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryExecutionFailed);

    // The merges went through, but the run failed, so the next run must
    // rescan the same window.
    let stored = pipeline
        .store
        .object(&pipeline.config.watermark_key)
        .await
        .expect("watermark still present");
    let after: Watermark = serde_json::from_slice(&stored).unwrap();
    assert_eq!(after.last_processed_time, before.last_processed_time);
}

#[tokio::test(flavor = "multi_thread")]
async fn skipped_batch_holds_the_watermark_back() {
    let pipeline = TestPipeline::new();
    let now = Utc::now();
    pipeline
        .store
        .insert_with_timestamp(
            "bronze/orders/garbled.json",
            b"not json at all".to_vec(),
            now - Duration::minutes(30),
        )
        .await;
    pipeline
        .seed_batch(
            EntityKind::Order,
            "good",
            &[raw_order("O1", "C1", 1.0)],
            now - Duration::minutes(5),
        )
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap();
    assert_eq!(report.batches_read, 1);
    assert_eq!(report.batches_skipped, 1);

    // Advancing to the good batch would orphan the older garbled one, so
    // the watermark stays put and both batches stay in the next window.
    assert!(report.watermark.is_none());
    assert!(pipeline
        .store
        .object(&pipeline.config.watermark_key)
        .await
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn every_run_refreshes_aggregates_after_the_merges() {
    let pipeline = TestPipeline::new();
    pipeline
        .seed_batch(
            EntityKind::Order,
            "batch-1",
            &[raw_order("O1", "C1", 42.5)],
            Utc::now() - Duration::minutes(5),
        )
        .await;

    let report = pipeline
        .orchestrator()
        .run(RunTrigger::Scheduled)
        .await
        .unwrap();
    assert_eq!(report.aggregates_refreshed, 3);

    let statements = pipeline.executor.statements().await;
    let merge_position = statements
        .iter()
        .position(|statement| statement.starts_with("MERGE INTO orders_enriched"))
        .expect("order merge issued");
    let aggregate_position = statements
        .iter()
        .position(|statement| statement.contains("daily_sales_by_region"))
        .expect("aggregate refresh issued");
    assert!(merge_position < aggregate_position);
}
