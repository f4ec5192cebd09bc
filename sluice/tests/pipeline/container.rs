use std::sync::{Arc, Mutex};

use sluice::{ContainerConfig, ContainerError, Keyed, KeyedItem, OrderedKeyedContainer};

use super::{init_tracing, settle};

#[tokio::test(start_paused = true)]
async fn test_ports_drive_the_container() {
    init_tracing();
    let container = OrderedKeyedContainer::new().unwrap();
    let adds = container.add_port();
    let deletes = container.delete_port();
    let output = container.output_port();

    for key in 1..=5u32 {
        adds.send(KeyedItem::new(key, key * 10)).await.unwrap();
    }
    deletes.send(2).await.unwrap();
    deletes.send(4).await.unwrap();
    settle().await;
    assert_eq!(container.approx_size(), 3);

    let mut values = Vec::new();
    for _ in 0..3 {
        values.push(*output.recv().await.unwrap().value());
    }
    assert_eq!(values, vec![10, 30, 50]);

    settle().await;
    assert_eq!(container.approx_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shared_handles_alias_the_same_item() {
    init_tracing();
    let container = OrderedKeyedContainer::new().unwrap();
    let shared = KeyedItem::new("job", Mutex::new(Vec::<u8>::new())).into_shared();

    container.add(Arc::clone(&shared)).await.unwrap();
    shared.value().lock().unwrap().push(1);

    let received = container.next().await.unwrap();
    assert!(Arc::ptr_eq(&shared, &received));
    assert_eq!(*received.value().lock().unwrap(), vec![1]);
    assert_eq!(received.key(), &"job");
}

#[tokio::test(start_paused = true)]
async fn test_by_value_items_are_copies() {
    init_tracing();
    let container = OrderedKeyedContainer::new().unwrap();
    let mut original = KeyedItem::new(1u8, String::from("before"));

    container.add(original.clone()).await.unwrap();
    original.value_mut().push_str("-changed");

    let received = container.next().await.unwrap();
    assert_eq!(received.value(), "before");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_is_safe() {
    init_tracing();
    let container = Arc::new(OrderedKeyedContainer::<KeyedItem<u32, ()>>::new().unwrap());
    let output = container.output_port();

    let closers: Vec<_> = (0..8)
        .map(|_| {
            let container = Arc::clone(&container);
            tokio::spawn(async move { container.close() })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap();
    }

    assert!(container.is_closed());
    settle().await;
    assert_eq!(output.recv().await, None);
    assert_eq!(
        container.add(KeyedItem::new(1, ())).await,
        Err(ContainerError::Closed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_closes_output() {
    init_tracing();
    let container = OrderedKeyedContainer::<KeyedItem<u32, ()>>::new().unwrap();
    let output = container.output_port();
    container.add(KeyedItem::new(1, ())).await.unwrap();

    drop(container);
    settle().await;

    assert_eq!(output.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_buffered_ports() {
    init_tracing();
    let config = ContainerConfig::default()
        .with_add_capacity(8)
        .with_delete_capacity(8)
        .with_output_capacity(1);
    let container = OrderedKeyedContainer::with_config(config).unwrap();

    for key in 0..8u32 {
        container.add(KeyedItem::new(key, ())).await.unwrap();
    }
    // Adds and deletes travel on separate queues
    settle().await;
    container.delete(7).await.unwrap();
    settle().await;

    let mut keys = Vec::new();
    for _ in 0..7 {
        keys.push(*container.next().await.unwrap().key());
    }
    assert_eq!(keys, (0..7).collect::<Vec<_>>());
}
