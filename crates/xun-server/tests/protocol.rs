//! Protocol round trip: the blocking client against a live server.

use xun_exec::{CallStatus, Coordinator};
use xun_server::handlers::AppState;
use xun_server::{build_router, HttpCoordinator};

async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn assign_await_done_round_trip() {
    let base = spawn_server().await;

    let outcome = tokio::task::spawn_blocking(move || {
        let winner = HttpCoordinator::new(base.clone()).unwrap();
        let loser = HttpCoordinator::new(base).unwrap();

        assert!(winner.assign("call-1").unwrap());
        assert!(!loser.assign("call-1").unwrap());

        let waiter = std::thread::spawn(move || loser.await_done("call-1").unwrap());
        std::thread::sleep(std::time::Duration::from_millis(50));
        winner.done("call-1", CallStatus::Done).unwrap();
        waiter.join().unwrap()
    })
    .await
    .unwrap();

    assert_eq!(outcome, CallStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_done_is_a_conflict() {
    let base = spawn_server().await;

    tokio::task::spawn_blocking(move || {
        let client = HttpCoordinator::new(base).unwrap();
        assert!(client.assign("call-2").unwrap());
        client.done("call-2", CallStatus::Failed).unwrap();
        assert!(client.done("call-2", CallStatus::Failed).is_err());
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_status_reaches_waiters() {
    let base = spawn_server().await;

    let status = tokio::task::spawn_blocking(move || {
        let client = HttpCoordinator::new(base).unwrap();
        assert!(client.assign("call-3").unwrap());
        client.done("call-3", CallStatus::Failed).unwrap();
        client.await_done("call-3").unwrap()
    })
    .await
    .unwrap();

    assert_eq!(status, CallStatus::Failed);
}
