//! Channel fan-in: four local producers each send 1..=100 down one shared
//! channel; a single consumer reads all 400 values. The multiset of values
//! received equals the union of what was sent, and each producer's own
//! sub-sequence is observed in order.

use std::collections::HashMap;

use meridian::config::NodeConfig;
use meridian::node::Node;

#[tokio::test(flavor = "multi_thread")]
async fn four_producers_fan_into_one_consumer_without_losing_or_reordering_per_producer() {
    let node = Node::start(NodeConfig::new("", "127.0.0.1")).await.unwrap();
    let (send, recv) = node.new_channel::<(u32, u32)>(); // (producer_id, value)

    for producer in 0..4u32 {
        let send = send.clone();
        node.spawn_local(move |ctx| async move {
            for value in 1..=100u32 {
                ctx.send_to_port(&send, (producer, value)).await.unwrap();
            }
        });
    }
    drop(send);

    let mut last_seen_per_producer: HashMap<u32, u32> = HashMap::new();
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for _ in 0..400 {
        let (producer, value) = recv.receive().await;
        let last = last_seen_per_producer.entry(producer).or_insert(0);
        assert!(value > *last, "producer {producer}'s values must arrive in order");
        *last = value;
        *counts.entry(producer).or_insert(0) += 1;
    }

    for producer in 0..4u32 {
        assert_eq!(counts.get(&producer), Some(&100));
        assert_eq!(last_seen_per_producer.get(&producer), Some(&100));
    }

    node.shutdown().await;
}
