//! The daemon event loop.

use fprint_core::{ShutdownRequest, wait_for_deadline};
use fprint_ipc::{IncomingRequest, Response};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::manager::{Manager, ManagerEvents};
use crate::server;

/// Why the event loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// No device was in use for the whole idle window
    IdleTimeout(ShutdownRequest),
    /// SIGTERM or SIGINT
    Signal,
    /// Every request sender is gone
    Disconnected,
}

/// Drive the manager until idle expiry or a shutdown signal.
pub async fn run(
    manager: &mut Manager,
    events: &mut ManagerEvents,
    requests: &mut mpsc::Receiver<IncomingRequest>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> ExitReason {
    info!(idle = ?manager.idle_state(), "Daemon running");

    loop {
        let deadline = manager.idle_deadline();

        // Pending device changes are applied before the deadline is considered.
        tokio::select! {
            biased;

            Some(changed) = events.in_use_rx.recv() => {
                manager.in_use_changed(changed.id);
            }

            Some(event) = events.hotplug_rx.recv() => {
                manager.handle_hotplug(event);
            }

            incoming = requests.recv() => {
                let Some(incoming) = incoming else {
                    return ExitReason::Disconnected;
                };
                let IncomingRequest { client_id, request, reply } = incoming;
                debug!(client_id, request_id = request.id, path = %request.path, "Handling IPC request");

                let result = server::handle_request(manager, &request);
                match reply.try_send(Response { id: request.id, result }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(response)) => {
                        warn!(client_id, request_id = response.id, "Client not reading, response dropped");
                    }
                    Err(TrySendError::Closed(response)) => {
                        warn!(client_id, request_id = response.id, "Client gone before response");
                    }
                }
            }

            Some(()) = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                return ExitReason::Signal;
            }

            () = wait_for_deadline(deadline) => {
                if let Some(request) = manager.poll_idle(Instant::now()) {
                    return ExitReason::IdleTimeout(request);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use fprint_core::{DeviceId, ObjectPath};
    use fprint_ipc::Method;
    use fprint_ipc::messages::Request;
    use serde_json::json;
    use tokio_test::{assert_pending, task};

    use super::*;
    use crate::manager::tests::{manager_with, sensor};

    const T: Duration = Duration::from_secs(30);

    struct Channels {
        request_tx: mpsc::Sender<IncomingRequest>,
        requests: mpsc::Receiver<IncomingRequest>,
        shutdown_tx: mpsc::Sender<()>,
        shutdown_rx: mpsc::Receiver<()>,
    }

    fn channels() -> Channels {
        let (request_tx, requests) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Channels { request_tx, requests, shutdown_tx, shutdown_rx }
    }

    async fn send(tx: &mpsc::Sender<IncomingRequest>, path: ObjectPath, method: Method) -> Response {
        let (reply, mut reply_rx) = mpsc::channel(1);
        let request = Request { id: 11, path, method };
        tx.send(IncomingRequest { client_id: 1, request, reply }).await.unwrap();
        reply_rx.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_service_exits_after_timeout() {
        let (mut manager, mut events, _rx) = manager_with(Vec::new(), false);
        let mut ch = channels();
        let start = Instant::now();

        let reason = run(&mut manager, &mut events, &mut ch.requests, &mut ch.shutdown_rx).await;

        assert_eq!(reason, ExitReason::IdleTimeout(ShutdownRequest { idle_for: T }));
        assert_eq!(Instant::now() - start, T);
        drop(ch.request_tx);
        drop(ch.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timeout_keeps_running() {
        let (mut manager, mut events, _rx) = manager_with(Vec::new(), true);
        let mut ch = channels();

        {
            let mut running =
                task::spawn(run(&mut manager, &mut events, &mut ch.requests, &mut ch.shutdown_rx));
            assert_pending!(running.poll());
            tokio::time::advance(Duration::from_secs(3600)).await;
            assert_pending!(running.poll());
        }

        ch.shutdown_tx.send(()).await.unwrap();
        let reason = run(&mut manager, &mut events, &mut ch.requests, &mut ch.shutdown_rx).await;
        assert_eq!(reason, ExitReason::Signal);
        drop(ch.request_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_answered_until_signal() {
        let (mut manager, mut events, _rx) = manager_with(vec![sensor(5), sensor(7)], true);
        let Channels { request_tx, mut requests, shutdown_tx, mut shutdown_rx } = channels();

        let client = async {
            let devices = send(&request_tx, ObjectPath::manager(), Method::GetDevices).await;
            let default = send(&request_tx, ObjectPath::manager(), Method::GetDefaultDevice).await;
            shutdown_tx.send(()).await.unwrap();
            (devices, default)
        };
        let (reason, (devices, default)) =
            tokio::join!(run(&mut manager, &mut events, &mut requests, &mut shutdown_rx), client);

        assert_eq!(reason, ExitReason::Signal);
        assert_eq!(devices.id, 11);
        assert_eq!(
            devices.result,
            Ok(json!(["/net/reactivated/Fprint/Device/5", "/net/reactivated/Fprint/Device/7"]))
        );
        assert_eq!(default.result, Ok(json!("/net/reactivated/Fprint/Device/5")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_holds_off_shutdown_until_release() {
        let (mut manager, mut events, _rx) = manager_with(vec![sensor(5), sensor(6)], false);
        let Channels { request_tx, mut requests, shutdown_tx: _shutdown_tx, mut shutdown_rx } = channels();
        let path = ObjectPath::for_device(DeviceId(5));
        let start = Instant::now();

        let client = async {
            let claim = Method::Call { member: "Claim".into(), args: json!({ "username": "testuser" }) };
            send(&request_tx, path.clone(), claim).await;
            tokio::time::sleep(Duration::from_secs(120)).await;
            let release = Method::Call { member: "Release".into(), args: json!(null) };
            send(&request_tx, path.clone(), release).await;
            Instant::now()
        };
        let (reason, released_at) =
            tokio::join!(run(&mut manager, &mut events, &mut requests, &mut shutdown_rx), client);

        assert_matches!(reason, ExitReason::IdleTimeout(_));
        assert_eq!(released_at - start, Duration::from_secs(120));
        assert_eq!(Instant::now() - released_at, T);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_replies_do_not_stall_loop() {
        let (mut manager, mut events, _rx) = manager_with(Vec::new(), false);
        let mut ch = channels();
        let (reply, _reply_rx) = mpsc::channel(1);
        reply.try_send(Response { id: 1, result: Ok(json!(null)) }).unwrap();
        let request = Request { id: 2, path: ObjectPath::manager(), method: Method::GetDevices };
        ch.request_tx.send(IncomingRequest { client_id: 3, request, reply }).await.unwrap();

        let reason = tokio::time::timeout(
            Duration::from_secs(3600),
            run(&mut manager, &mut events, &mut ch.requests, &mut ch.shutdown_rx),
        )
        .await;

        assert_matches!(reason, Ok(ExitReason::IdleTimeout(_)));
        drop(ch.shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_at_deadline_prevents_shutdown() {
        for _ in 0..32 {
            let (mut manager, mut events, _rx) = manager_with(vec![sensor(5)], false);
            let mut ch = channels();
            tokio::time::advance(T).await;
            let claim = Method::Call { member: "Claim".into(), args: json!({ "username": "testuser" }) };
            let request = Request { id: 1, path: ObjectPath::for_device(DeviceId(5)), method: claim };
            server::handle_request(&manager, &request).unwrap();

            {
                let mut running =
                    task::spawn(run(&mut manager, &mut events, &mut ch.requests, &mut ch.shutdown_rx));
                assert_pending!(running.poll());
            }

            assert_eq!(manager.idle_state(), fprint_core::IdleState::Active);
            drop(ch.request_tx);
            drop(ch.shutdown_tx);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_request_channel_stops_loop() {
        let (mut manager, mut events, _rx) = manager_with(Vec::new(), true);
        let mut ch = channels();
        drop(ch.request_tx);

        let reason = run(&mut manager, &mut events, &mut ch.requests, &mut ch.shutdown_rx).await;

        assert_eq!(reason, ExitReason::Disconnected);
        drop(ch.shutdown_tx);
    }
}
