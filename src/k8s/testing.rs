//! Scripted API server for driving CRUD code through a real `kube::Client`

use http::{Request, Response};
use kube::Client;
use kube::client::Body;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

/// A request as the API server saw it
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

/// One expected request and the reply it gets
pub struct Exchange {
    method: &'static str,
    path: String,
    status: u16,
    reply: Value,
}

pub fn exchange(method: &'static str, path: &str, status: u16, reply: Value) -> Exchange {
    Exchange {
        method,
        path: path.to_string(),
        status,
        reply,
    }
}

/// `Status` body the API server sends with errors
pub fn status(code: u16, reason: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("{} ({})", reason, code),
        "reason": reason,
        "code": code
    })
}

/// Client whose requests must match `script` in order. The handle yields
/// every request seen once the script is exhausted.
pub fn scripted(script: Vec<Exchange>) -> (Client, JoinHandle<Vec<Seen>>) {
    let (service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let server = tokio::spawn(async move {
        let mut seen = Vec::new();
        for step in script {
            let (request, send) = handle.next_request().await.expect("client sent no request");
            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            let bytes = request.into_body().collect_bytes().await.unwrap();
            let body = serde_json::from_slice(&bytes).ok();
            assert_eq!((method.as_str(), path.as_str()), (step.method, step.path.as_str()));
            seen.push(Seen { method, path, body });

            let response = Response::builder()
                .status(step.status)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&step.reply).unwrap()))
                .unwrap();
            send.send_response(response);
        }
        seen
    });
    (Client::new(service, "default"), server)
}
