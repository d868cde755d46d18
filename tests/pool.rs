//! Pool capacity, fairness, and eviction behaviour against a live echo
//! server.

use std::{net::SocketAddr, time::Duration};

use futures::FutureExt;
use tokio::{
    net::TcpListener,
    sync::mpsc,
    time::{sleep, timeout},
};
use wirepool::{Config, Connection, Message, Pool, Server, WireError, server};

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn echo_handler() -> server::Handler {
    server::handler(|message: Message, conn: &mut Connection| {
        async move {
            let kind = format!("{}-reply", message.kind());
            let payload = format!(">{}|", String::from_utf8_lossy(message.payload()));
            conn.send(Message::text(kind, payload)).await
        }
        .boxed()
    })
}

async fn start_echo_server() -> TestResult<SocketAddr> {
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    let bound = Server::new(Config::new(addr)).bind().await?;
    let addr = bound.local_addr().ok_or("tcp endpoint exposes its address")?;
    tokio::spawn(bound.run_until(echo_handler()));
    Ok(addr)
}

#[tokio::test]
async fn capacity_is_bounded_and_waiters_resolve_on_release() -> TestResult {
    let addr = start_echo_server().await?;
    let pool = Pool::new(
        Config::new(addr)
            .max_count(3)
            .min_count(0)
            .linger_time(Duration::from_secs(60)),
    );

    let a = pool.acquire().await?;
    let b = pool.acquire().await?;
    let c = pool.acquire().await?;
    assert_eq!(pool.size(), 3);

    // At capacity: a fourth acquire queues rather than failing or growing.
    let overflow = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    sleep(Duration::from_millis(50)).await;
    assert!(!overflow.is_finished());
    assert_eq!(pool.size(), 3);
    assert_eq!(pool.waiting(), 1);

    drop(a);
    let handed = timeout(Duration::from_secs(1), overflow).await???;
    // Direct handover: same connection count, no idle gap.
    assert_eq!(pool.size(), 3);
    assert_eq!(pool.idle_count(), 0);

    drop(handed);
    drop(b);
    drop(c);
    assert_eq!(pool.size(), 3);
    assert_eq!(pool.idle_count(), 3);
    Ok(())
}

#[tokio::test]
async fn waiters_are_served_in_arrival_order() -> TestResult {
    let addr = start_echo_server().await?;
    let pool = Pool::new(
        Config::new(addr)
            .max_count(1)
            .min_count(0)
            .linger_time(Duration::from_secs(60)),
    );

    let held = pool.acquire().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..3 {
        let pool = pool.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let conn = pool.acquire().await.expect("acquire");
            tx.send(i).expect("record order");
            // Dropping passes the connection straight to the next waiter.
            drop(conn);
        });
        // Serialise the enqueue order.
        sleep(Duration::from_millis(30)).await;
    }
    assert_eq!(pool.waiting(), 3);

    drop(held);
    let mut order = Vec::new();
    for _ in 0..3 {
        let i = timeout(Duration::from_secs(1), rx.recv())
            .await?
            .ok_or("order entry")?;
        order.push(i);
    }
    assert_eq!(order, vec![0, 1, 2]);
    Ok(())
}

#[tokio::test]
async fn idle_pool_settles_at_min_count() -> TestResult {
    let addr = start_echo_server().await?;
    let pool = Pool::new(
        Config::new(addr)
            .max_count(4)
            .min_count(1)
            .linger_time(Duration::from_millis(100)),
    );

    let conns = vec![
        pool.acquire().await?,
        pool.acquire().await?,
        pool.acquire().await?,
    ];
    assert_eq!(pool.size(), 3);
    drop(conns);
    assert_eq!(pool.idle_count(), 3);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.idle_count(), 1);
    Ok(())
}

#[tokio::test]
async fn reacquisition_cancels_eviction() -> TestResult {
    let addr = start_echo_server().await?;
    let pool = Pool::new(
        Config::new(addr)
            .max_count(2)
            .min_count(0)
            .linger_time(Duration::from_millis(100)),
    );

    let first = pool.acquire().await?;
    let first_id = first.id();
    drop(first);
    sleep(Duration::from_millis(30)).await;

    // Re-acquiring before the linger expires disarms the timer.
    let again = pool.acquire().await?;
    assert_eq!(again.id(), first_id);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.size(), 1);

    // With min_count zero the pool may drain completely once idle.
    drop(again);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.size(), 0);
    Ok(())
}

#[tokio::test]
async fn dead_idle_connection_is_replaced_on_acquire() -> TestResult {
    // A server that keeps each connection briefly, then closes it.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                sleep(Duration::from_millis(80)).await;
                drop(stream);
            });
        }
    });

    let pool = Pool::new(
        Config::new(addr)
            .max_count(2)
            .min_count(1)
            .linger_time(Duration::from_secs(60)),
    );
    let first = pool.acquire().await?;
    let first_id = first.id();
    drop(first);
    assert_eq!(pool.idle_count(), 1);

    // Let the server close the parked connection under us.
    sleep(Duration::from_millis(200)).await;

    let second = pool.acquire().await?;
    assert_ne!(second.id(), first_id);
    assert_eq!(pool.size(), 1);
    Ok(())
}

#[tokio::test]
async fn broken_connection_is_removed_without_waking_waiters() -> TestResult {
    // A server that accepts and immediately slams the door.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            drop(stream);
        }
    });

    let pool = Pool::new(Config::new(addr).max_count(1).min_count(0));
    let mut held = pool.acquire().await?;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.waiting(), 1);

    let err = held
        .send_wait(Message::text("ping", ""))
        .await
        .expect_err("peer is gone");
    assert!(matches!(err, WireError::Closed | WireError::Transport(_)));
    drop(held);
    assert_eq!(pool.size(), 0);

    // Removal freed capacity but must not wake the waiter.
    sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());
    assert_eq!(pool.waiting(), 1);

    // A fresh acquire creates a new connection under capacity; releasing
    // it is what finally serves the queued waiter.
    let fresh = pool.acquire().await?;
    assert_eq!(pool.size(), 1);
    drop(fresh);
    let handed = timeout(Duration::from_secs(1), waiter).await???;
    drop(handed);
    Ok(())
}
