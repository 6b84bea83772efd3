//! Example adapter for an SQS-style queue API
//!
//! This example shows:
//! - Declaring a projection table for a queue's attributes
//! - Encoding local state for create and update calls
//! - Waiting out propagation after each mutation
//! - Waiting for a deletion to hold

use attrsync::{
    wait_attributes_propagated, wait_removed, AttributeSpec, BoxError, Context, PollConfig,
    ProjectionTable, RemoteAttributes, ResourceData,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type FetchFuture =
    Pin<Box<dyn Future<Output = Result<Option<RemoteAttributes>, BoxError>> + Send>>;

/// In-memory queue API where writes take a few reads to become visible,
/// like a regional service replicating attribute changes.
struct EventuallyConsistentQueue {
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    visible: Option<RemoteAttributes>,
    committed: Option<RemoteAttributes>,
    stale_reads: usize,
}

impl EventuallyConsistentQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
        })
    }

    fn write(&self, attributes: Option<RemoteAttributes>, stale_reads: usize) {
        let mut state = self.state.lock().unwrap();
        state.committed = attributes;
        state.stale_reads = stale_reads;
    }

    fn read(&self) -> Option<RemoteAttributes> {
        let mut state = self.state.lock().unwrap();
        if state.stale_reads > 0 {
            state.stale_reads -= 1;
            if state.stale_reads == 0 {
                state.visible = state.committed.clone();
            }
        }
        state.visible.clone()
    }
}

fn fetch_from(queue: &Arc<EventuallyConsistentQueue>) -> impl FnMut() -> FetchFuture + Send {
    let queue = Arc::clone(queue);
    move || -> FetchFuture {
        let queue = Arc::clone(&queue);
        Box::pin(async move { Ok(queue.read()) })
    }
}

fn queue_projection() -> ProjectionTable {
    ProjectionTable::builder()
        .attribute(AttributeSpec::int("delay_seconds", "DelaySeconds").optional_computed())
        .attribute(AttributeSpec::int("max_message_size", "MaximumMessageSize"))
        .attribute(AttributeSpec::bool("fifo_queue", "FifoQueue"))
        .attribute(AttributeSpec::string("policy", "Policy"))
        .build()
        .expect("projection table is statically valid")
}

fn demo_config() -> PollConfig {
    PollConfig {
        timeout: Duration::from_secs(10),
        min_timeout: Duration::from_millis(50),
        max_timeout: Duration::from_millis(200),
        not_found_checks: 5,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() {
    let table = queue_projection();
    let queue = EventuallyConsistentQueue::new();
    let ctx = Context::new().with_timeout(Duration::from_secs(30));

    println!("=== Projection Table ===");
    println!("Remote attribute names: {:?}", table.remote_names());

    println!("\n=== Create ===");
    let mut desired = ResourceData::new();
    desired.set_int("delay_seconds", 90);
    desired.set_bool("fifo_queue", true);
    desired.set_int("max_message_size", 0);

    let create_attrs = table.to_api_attributes_for_create(&desired).unwrap();
    println!("Create call sends: {:?}", create_attrs);
    queue.write(Some(create_attrs.clone()), 3);

    let observed = wait_attributes_propagated(
        &ctx,
        &table,
        &create_attrs,
        fetch_from(&queue),
        demo_config(),
    )
    .await
    .unwrap();
    println!("Propagated attribute bag: {:?}", observed);

    let mut refreshed = ResourceData::new();
    table.to_resource_data(&observed, &mut refreshed).unwrap();
    println!(
        "Refreshed local state: delay_seconds={} fifo_queue={} max_message_size={}",
        refreshed.get_int("delay_seconds").unwrap(),
        refreshed.get_bool("fifo_queue").unwrap(),
        refreshed.get_int("max_message_size").unwrap(),
    );

    println!("\n=== Update ===");
    desired.set_int("delay_seconds", 0);
    let update_attrs = table
        .to_api_attributes_for_update(&desired, &["delay_seconds"])
        .unwrap();
    println!("Update call sends: {:?}", update_attrs);

    let mut merged = observed.clone();
    merged.extend(update_attrs.clone());
    queue.write(Some(merged), 2);

    wait_attributes_propagated(&ctx, &table, &update_attrs, fetch_from(&queue), demo_config())
        .await
        .unwrap();
    println!("Update propagated");

    println!("\n=== Delete ===");
    queue.write(None, 2);
    let removal_config = PollConfig {
        continuous_target_occurrence: 3,
        ..demo_config()
    };
    wait_removed(&ctx, fetch_from(&queue), removal_config)
        .await
        .unwrap();
    println!("Queue stayed gone for 3 consecutive checks");
}
