use std::convert::Infallible;

use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Bytes, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{error, info};
use serde_json::json;
use tokio::net::TcpListener;

use crate::error::NodeError;
use crate::network_client::NetworkClient;
use crate::node::ChordNode;

fn format_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn not_found() -> Response<Full<Bytes>> {
    format_response(
        StatusCode::NOT_FOUND,
        json!({ "error": "Not Found" }).to_string(),
    )
}

fn ping() -> Response<Full<Bytes>> {
    let response_body = json!({ "message": "pong" }).to_string();
    format_response(StatusCode::OK, response_body)
}

fn state<T: NetworkClient>(node: &ChordNode<T>) -> Response<Full<Bytes>> {
    match serde_json::to_string(&node.snapshot()) {
        Ok(body) => format_response(StatusCode::OK, body),
        Err(e) => format_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": e.to_string() }).to_string(),
        ),
    }
}

fn route<T: NetworkClient>(node: &ChordNode<T>, method: &Method, path: &str) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/ping") => ping(),
        (&Method::GET, "/state") => state(node),
        _ => not_found(),
    }
}

async fn handler<T: NetworkClient>(
    node: ChordNode<T>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(&node, req.method(), req.uri().path()))
}

/// Serves the read-only introspection endpoints on `address`.
pub async fn run<T: NetworkClient>(node: ChordNode<T>, address: &str) -> Result<(), NodeError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| NodeError::Api(format!("failed to bind {}: {}", address, e)))?;

    info!("[{}] API is listening on http://{}", node.info, address);
    loop {
        let (tcp, _) = listener
            .accept()
            .await
            .map_err(|e| NodeError::Api(e.to_string()))?;
        let io = TokioIo::new(tcp);
        let node = node.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req| handler(node.clone(), req));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving API connection: {:?}", err);
            }
        });
    }
}
