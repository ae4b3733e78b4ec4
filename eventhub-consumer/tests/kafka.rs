use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use envconfig::Envconfig;
use health::HealthRegistry;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;

use eventhub_consumer::config::Config;
use eventhub_consumer::error::HandlerError;
use eventhub_consumer::event::ReceivedEvent;
use eventhub_consumer::handler::{EventHandler, PrintingHandler};
use eventhub_consumer::partition::PartitionContext;
use eventhub_consumer::service;

const EVENTHUB: &str = "spherelight";
const CONSUMER_GROUP: &str = "printer";

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Prints each event after a pause, so a rebalance lands while events
/// are still being handled.
struct SlowPrinter {
    inner: PrintingHandler<SharedBuffer>,
    delay: Duration,
}

#[async_trait]
impl EventHandler for SlowPrinter {
    async fn on_event(
        &self,
        ctx: &PartitionContext,
        event: ReceivedEvent,
    ) -> Result<(), HandlerError> {
        tokio::time::sleep(self.delay).await;
        self.inner.on_event(ctx, event).await
    }
}

async fn wait_for_lines(out: &SharedBuffer, count: usize) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while out.lines().len() < count {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("events were not consumed in time");
}

fn config(bootstrap: &str, overrides: &[(&str, &str)]) -> Config {
    let mut env = HashMap::from([
        (
            "EVENTHUB_CONNECTION_STRING".to_owned(),
            format!("Endpoint=sb://localhost/;SharedAccessKeyName=test;SharedAccessKey=dGVzdA==;EntityPath={EVENTHUB}"),
        ),
        ("EVENTHUB_CONSUMER_GROUP".to_owned(), CONSUMER_GROUP.to_owned()),
        ("EVENTHUB_KAFKA_BOOTSTRAP".to_owned(), bootstrap.to_owned()),
        ("EVENTHUB_KAFKA_PLAINTEXT".to_owned(), "true".to_owned()),
        ("EVENTHUB_STARTING_POSITION".to_owned(), "earliest".to_owned()),
        ("EVENTHUB_RECEIVE_TIMEOUT".to_owned(), "500".to_owned()),
    ]);
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    Config::init_from_hashmap(&env).expect("invalid test configuration")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumes_and_commits_through_the_kafka_endpoint() {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    cluster
        .create_topic(EVENTHUB, 1, 1)
        .expect("failed to create topic");
    let bootstrap = cluster.bootstrap_servers();

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &bootstrap)
        .create()
        .expect("failed to create producer");
    for body in ["E1", "E2", "E3"] {
        producer
            .send(
                FutureRecord::<(), str>::to(EVENTHUB).payload(body).partition(0),
                Timeout::After(Duration::from_secs(5)),
            )
            .await
            .expect("failed to produce");
    }

    let out = SharedBuffer::default();
    let handler = Arc::new(PrintingHandler::new(out.clone()));
    let liveness = HealthRegistry::new("liveness").register("consumer", time::Duration::seconds(30));
    let token = CancellationToken::new();

    let stop = token.clone();
    let config = config(&bootstrap, &[]);
    let running = tokio::spawn(async move {
        service::run(&config, handler, liveness, async move { stop.cancelled().await }).await
    });

    wait_for_lines(&out, 3).await;
    token.cancel();
    running
        .await
        .expect("consumer task panicked")
        .expect("consumer failed");

    let lines = out.lines();
    for (line, body) in lines.iter().zip(["E1", "E2", "E3"]) {
        assert!(line.starts_with(&format!("Received the event: \"{{ body: '{}'", body)));
        assert!(line.ends_with("from the partition with ID: \"0\""));
    }

    let checker: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", &bootstrap)
        .set("group.id", CONSUMER_GROUP)
        .create()
        .expect("failed to create checking consumer");
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(EVENTHUB, 0);
    let committed = checker
        .committed_offsets(tpl, Timeout::After(Duration::from_secs(10)))
        .expect("failed to fetch committed offsets");

    assert_eq!(
        committed
            .find_partition(EVENTHUB, 0)
            .map(|element| element.offset()),
        Some(Offset::Offset(3))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keeps_consuming_when_another_member_joins_the_group() {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    cluster
        .create_topic(EVENTHUB, 4, 1)
        .expect("failed to create topic");
    let bootstrap = cluster.bootstrap_servers();

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &bootstrap)
        .set("linger.ms", "0")
        .create()
        .expect("failed to create producer");
    for i in 0..1000 {
        let body = format!("E{}", i);
        producer
            .send(
                FutureRecord::<(), str>::to(EVENTHUB)
                    .payload(&body)
                    .partition(i % 4),
                Timeout::After(Duration::from_secs(5)),
            )
            .await
            .expect("failed to produce");
    }

    let out = SharedBuffer::default();
    let handler = Arc::new(SlowPrinter {
        inner: PrintingHandler::new(out.clone()),
        delay: Duration::from_millis(50),
    });
    let liveness = HealthRegistry::new("liveness").register("consumer", time::Duration::seconds(30));
    let token = CancellationToken::new();

    let stop = token.clone();
    let config = config(&bootstrap, &[("PARTITION_CHANNEL_CAPACITY", "10")]);
    let running = tokio::spawn(async move {
        service::run(&config, handler, liveness, async move { stop.cancelled().await }).await
    });

    wait_for_lines(&out, 20).await;

    // A second member of the group takes over some of the partitions.
    let member_bootstrap = bootstrap.clone();
    let received = tokio::task::spawn_blocking(move || {
        let member: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &member_bootstrap)
            .set("group.id", CONSUMER_GROUP)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .expect("failed to create second member");
        member
            .subscribe(&[EVENTHUB])
            .expect("failed to subscribe second member");

        let mut received = 0;
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(Ok(_)) = member.poll(Duration::from_millis(100)) {
                received += 1;
            }
        }
        received
    })
    .await
    .expect("second member panicked");

    assert!(received > 0, "second member was never assigned a partition");
    assert!(!running.is_finished(), "consumer stopped during the rebalance");

    token.cancel();
    running
        .await
        .expect("consumer task panicked")
        .expect("consumer failed after the rebalance");
}
