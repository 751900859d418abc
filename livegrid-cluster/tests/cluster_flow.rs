//! Cluster entry-point flow: balance a new viewer onto a node, place the
//! stream on the ring, record the session, then shrink the cluster and
//! migrate only what moved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use livegrid_cluster::{
    ConsistentHashRouter, LoadBalancer, MemorySessionStore, Node, Session, SessionStore, Strategy,
};

fn cluster_nodes() -> Vec<Arc<Node>> {
    ["n1", "n2", "n3"]
        .iter()
        .map(|id| {
            Arc::new(
                Node::new(*id, format!("{id}.cluster.local:1935"))
                    .with_weight(1)
                    .with_max_connections(100),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_viewer_admission_flow() {
    let cancel = CancellationToken::new();
    let balancer = LoadBalancer::new(Strategy::LeastConnections);
    let router = ConsistentHashRouter::default();
    let sessions = MemorySessionStore::new();

    for node in cluster_nodes() {
        balancer.add_node(Arc::clone(&node)).expect("balancer add");
        router.add_node(node).expect("router add");
    }

    // Stream affinity comes from the ring, viewer placement from the
    // balancer.
    let ingest_node = router.get_node("room-7/main").expect("stream owner");
    let viewer_node = balancer.select().expect("viewer node");
    viewer_node.connection_opened();

    let session = Session::new(
        "sess-1",
        "viewer-42",
        "room-7/main",
        &viewer_node.id,
        Duration::from_secs(3600),
    );
    sessions.create(session, &cancel).await.expect("create session");

    let found = sessions.get("sess-1", &cancel).await.expect("get session");
    assert_eq!(found.stream_id, "room-7/main");
    assert_eq!(found.node_id, viewer_node.id);

    let on_node = sessions
        .by_node(&viewer_node.id, &cancel)
        .await
        .expect("by_node");
    assert_eq!(on_node.len(), 1);

    // The stream owner is stable across repeated lookups.
    assert_eq!(router.get_node("room-7/main").expect("owner").id, ingest_node.id);
}

#[tokio::test]
async fn test_node_drain_migrates_only_its_streams() {
    let cancel = CancellationToken::new();
    let router = ConsistentHashRouter::default();
    let sessions = MemorySessionStore::new();

    for node in cluster_nodes() {
        router.add_node(node).expect("router add");
    }

    // Place a fleet of streams and record their sessions.
    let mut placements: HashMap<String, String> = HashMap::new();
    for index in 0..60 {
        let stream_id = format!("stream-{index}");
        let owner = router.get_node(&stream_id).expect("owner").id.clone();
        sessions
            .create(
                Session::new(
                    format!("sess-{index}"),
                    format!("pub-{index}"),
                    &stream_id,
                    &owner,
                    Duration::from_secs(600),
                ),
                &cancel,
            )
            .await
            .expect("create");
        placements.insert(stream_id, owner);
    }

    // Drain one node.
    router.remove_node("n2").expect("remove n2");
    let migrations = router.rebalance(&placements);

    // Exactly the drained node's streams move, nowhere else.
    let from_n2 = placements.values().filter(|owner| *owner == "n2").count();
    assert_eq!(migrations.len(), from_n2);
    for migration in &migrations {
        assert_eq!(migration.from, "n2");
        assert_ne!(migration.to, "n2");

        // Re-home the session records that followed the stream.
        let moved = sessions
            .by_stream(&migration.stream_id, &cancel)
            .await
            .expect("by_stream");
        for session in moved {
            sessions.delete(&session.id, &cancel).await.expect("delete");
            let mut rehomed = session.clone();
            rehomed.node_id = migration.to.clone();
            sessions.create(rehomed, &cancel).await.expect("recreate");
        }
    }

    let stranded = sessions.by_node("n2", &cancel).await.expect("by_node");
    assert!(stranded.is_empty(), "no session may still reference n2");
}
