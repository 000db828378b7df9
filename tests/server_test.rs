//! Integration tests for the squat coach HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use futures_util::StreamExt;
    use squat_coach::config::Config;
    use squat_coach::server::run;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> Config {
        Config {
            port: 0,
            ..Config::default()
        }
    }

    async fn start() -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let (addr, shutdown_tx) = run(test_config()).await.expect("Failed to start server");
        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    async fn connect_ws(addr: SocketAddr, user_id: &str) -> WsStream {
        let (ws, _) = connect_async(format!("ws://{}/ws/{}", addr, user_id))
            .await
            .expect("Failed to open WebSocket");
        ws
    }

    /// Next JSON frame whose `type` is `kind`, skipping everything else.
    async fn next_of_type(ws: &mut WsStream, kind: &str) -> serde_json::Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("Timed out waiting for a frame")
                .expect("WebSocket closed")
                .expect("WebSocket error");
            if let Message::Text(text) = message {
                let frame: serde_json::Value =
                    serde_json::from_str(&text).expect("Failed to parse frame");
                if frame["type"] == kind {
                    return frame;
                }
            }
        }
    }

    async fn get_json(client: &reqwest::Client, url: String) -> serde_json::Value {
        client
            .get(url)
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON")
    }

    async fn post_reading(client: &reqwest::Client, addr: SocketAddr, side: &str) {
        let reading = serde_json::json!({
            "side": side,
            "ratio1": 15.0, "ratio2": 10.0, "ratio3": 12.5,
            "ratio4": 12.5, "ratio5": 45.0, "ratio6": 5.0
        });
        let response = client
            .post(format!("http://{}/api/fsr_data", addr))
            .json(&reading)
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_fsr_ingest_latest_and_feedback() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        // Empty store: no latest readings, classifier reports no data
        let latest: serde_json::Value = client
            .get(format!("http://{}/api/fsr_data/latest", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert!(latest["left"].is_null());
        assert!(latest["right"].is_null());

        let feedback: serde_json::Value = client
            .get(format!("http://{}/api/fsr_data/feedback", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(feedback["status"], "NO_DATA");
        assert_eq!(feedback["stage"], "UNKNOWN");

        // Stable descent on both feet
        for side in ["left", "right"] {
            let reading = serde_json::json!({
                "side": side,
                "ratio1": 15.0, "ratio2": 10.0, "ratio3": 12.5,
                "ratio4": 12.5, "ratio5": 45.0, "ratio6": 5.0
            });
            let body: serde_json::Value = client
                .post(format!("http://{}/api/fsr_data", addr))
                .json(&reading)
                .send()
                .await
                .expect("Failed to send request")
                .json()
                .await
                .expect("Failed to parse JSON");
            assert_eq!(body["accepted"], true);
            assert_eq!(body["side"], side);
        }

        let latest: serde_json::Value = client
            .get(format!("http://{}/api/fsr_data/latest", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(latest["left"]["side"], "left");
        assert_eq!(latest["right"]["side"], "right");

        let feedback: serde_json::Value = client
            .get(format!("http://{}/api/fsr_data/feedback", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(feedback["stage"], "DESCENT");
        assert_eq!(feedback["status"], "GOOD");
        assert!(feedback["feedback"].as_str().unwrap().chars().count() <= 25);
        assert_eq!(feedback["metrics"]["rear"], 60.0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_unknown_side_is_dropped_without_error() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/api/fsr_data", addr))
            .json(&serde_json::json!({"side": "middle", "ratio1": 50.0}))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["accepted"], false);

        let stats: serde_json::Value = client
            .get(format!("http://{}/api/stats", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(stats["samplesRejected"], 1);
        assert_eq!(stats["samplesIngested"], 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ai_status_validation() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/internal/ai/status/guest-1", addr))
            .json(&serde_json::json!({"lumbar": "bad", "knee": "good"}))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["userId"], "guest-1");
        assert_eq!(body["ai"]["lumbar"], "bad");
        assert_eq!(body["ai"]["knee"], "good");

        let response = client
            .post(format!("http://{}/internal/ai/status/guest-1", addr))
            .json(&serde_json::json!({"lumbar": "terrible"}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "INVALID_STATUS");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_callback() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let session: serde_json::Value = client
            .post(format!("http://{}/api/sessions", addr))
            .json(&serde_json::json!({"userId": "guest-2"}))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(session["userId"], "guest-2");
        assert_eq!(session["status"], "ACTIVE");
        let session_id = session["sessionId"].as_str().unwrap().to_string();

        let mut ws = connect_ws(addr, "guest-2").await;
        next_of_type(&mut ws, "FSR").await;

        let response = client
            .post(format!(
                "http://{}/internal/sessions/{}/feedback",
                addr, session_id
            ))
            .json(&serde_json::json!({
                "type": "analysis",
                "squatCount": 2,
                "checks": {"back": "good", "knee": "too forward"}
            }))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["userId"], "guest-2");
        assert_eq!(body["voice"], "Keep knees over your toes");
        let voice = next_of_type(&mut ws, "voice").await;
        assert_eq!(voice["text"], "Keep knees over your toes");

        let finished: serde_json::Value = client
            .post(format!("http://{}/api/sessions/{}/finish", addr, session_id))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(finished["status"], "COMPLETED");

        let response = client
            .post(format!(
                "http://{}/internal/sessions/{}/feedback",
                addr, session_id
            ))
            .json(&serde_json::json!({"type": "feedback", "feedback": "Nice"}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx) = start().await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(
                reqwest::Method::OPTIONS,
                format!("http://{}/api/fsr_data", addr),
            )
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_callback_without_push_connection_stays_silent() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let session: serde_json::Value = client
            .post(format!("http://{}/api/sessions", addr))
            .json(&serde_json::json!({"userId": "guest-4"}))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        let session_id = session["sessionId"].as_str().unwrap().to_string();

        let body: serde_json::Value = client
            .post(format!(
                "http://{}/internal/sessions/{}/feedback",
                addr, session_id
            ))
            .json(&serde_json::json!({"type": "analysis", "checks": {"knee": "bad"}}))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["userId"], "guest-4");
        assert!(body["voice"].is_null());

        // The posture state is still recorded
        let combined = get_json(
            &client,
            format!("http://{}/api/fsr_data/feedback/combined?userId=guest-4", addr),
        )
        .await;
        assert_eq!(combined["ai"]["status"], "BAD");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_combined_feedback_endpoint() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let combined = get_json(
            &client,
            format!("http://{}/api/fsr_data/feedback/combined", addr),
        )
        .await;
        assert_eq!(combined["ai"]["status"], "NO_DATA");
        assert_eq!(combined["fsr"]["status"], "NO_DATA");
        assert_eq!(combined["overallMessages"].as_array().map(Vec::len), Some(1));

        client
            .post(format!("http://{}/internal/ai/status/guest-5", addr))
            .json(&serde_json::json!({"lumbar": "bad", "knee": "good"}))
            .send()
            .await
            .expect("Failed to send request");
        post_reading(&client, addr, "left").await;
        post_reading(&client, addr, "right").await;

        let combined = get_json(
            &client,
            format!("http://{}/api/fsr_data/feedback/combined?userId=guest-5", addr),
        )
        .await;
        assert_eq!(combined["ai"]["status"], "BAD");
        assert_eq!(combined["ai"]["raw"]["knee"], "good");
        assert_eq!(combined["fsr"]["stage"], "DESCENT");
        assert_eq!(
            combined["overallMessages"],
            serde_json::json!(["Keep your back straight", "Descent looks stable"])
        );

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ws_snapshot_on_open_and_on_ingest() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();
        let mut ws = connect_ws(addr, "guest-6").await;

        // Both sides zero-filled before any reading
        let opening = next_of_type(&mut ws, "FSR").await;
        assert_eq!(opening["payload"]["left"]["side"], "left");
        assert_eq!(
            opening["payload"]["left"]["ratios"],
            serde_json::json!([0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
        );
        assert_eq!(
            opening["payload"]["right"]["ratios"],
            serde_json::json!([0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
        );

        post_reading(&client, addr, "left").await;
        let update = next_of_type(&mut ws, "FSR").await;
        assert_eq!(update["payload"]["left"]["ratios"][0], 15.0);
        assert_eq!(update["payload"]["right"]["ratios"][0], 0.0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ws_close_drops_channel_and_ai_state() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let mut ws = connect_ws(addr, "guest-7").await;
        next_of_type(&mut ws, "FSR").await;
        client
            .post(format!("http://{}/internal/ai/status/guest-7", addr))
            .json(&serde_json::json!({"knee": "bad"}))
            .send()
            .await
            .expect("Failed to send request");

        let stats = get_json(&client, format!("http://{}/api/stats", addr)).await;
        assert_eq!(stats["connectedUsers"], 1);
        assert_eq!(stats["trackedUsers"], 1);

        ws.close(None).await.expect("Failed to close WebSocket");
        drop(ws);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = get_json(&client, format!("http://{}/api/stats", addr)).await;
        assert_eq!(stats["connectedUsers"], 0);
        assert_eq!(stats["trackedUsers"], 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ws_closing_older_connection_keeps_newer() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let mut first = connect_ws(addr, "guest-8").await;
        next_of_type(&mut first, "FSR").await;
        let mut second = connect_ws(addr, "guest-8").await;
        next_of_type(&mut second, "FSR").await;

        client
            .post(format!("http://{}/internal/ai/status/guest-8", addr))
            .json(&serde_json::json!({"ankle": "bad"}))
            .send()
            .await
            .expect("Failed to send request");

        first.close(None).await.expect("Failed to close WebSocket");
        drop(first);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = get_json(&client, format!("http://{}/api/stats", addr)).await;
        assert_eq!(stats["connectedUsers"], 1);
        assert_eq!(stats["trackedUsers"], 1);

        // The newer connection still receives pushes
        post_reading(&client, addr, "right").await;
        let update = next_of_type(&mut second, "FSR").await;
        assert_eq!(update["payload"]["right"]["ratios"][0], 15.0);

        let _ = shutdown_tx.send(());
    }
}
