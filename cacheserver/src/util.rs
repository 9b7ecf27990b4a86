use http::{Response, StatusCode};
use pingora::protocols::http::ServerSession;
use serde::Serialize;

/// Every binary in this workspace initializes its own `env_logger`;
/// library crates only ever use the `log` facade.
pub fn setup_logs() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

pub fn response_no_body(status: StatusCode) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_LENGTH, 0)
        .body(Vec::new())
        .unwrap()
}

pub fn response_string(status: StatusCode, body: &str) -> Response<Vec<u8>> {
    let body = body.as_bytes().to_vec();
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .header(http::header::CONTENT_LENGTH, body.len())
        .body(body)
        .unwrap()
}

pub fn response_bytes(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .header(http::header::CONTENT_LENGTH, body.len())
        .body(body)
        .unwrap()
}

pub fn response_json<T: Serialize>(status: StatusCode, value: T) -> Response<Vec<u8>> {
    let body = serde_json::to_vec(&value).unwrap();
    response_bytes(status, "application/json", body)
}

/// Reads the full request body off `session` up to `max_body_size`,
/// refusing anything larger rather than buffering it unbounded.
pub async fn read_full_server_request_body(
    session: &mut ServerSession,
    max_body_size: usize,
) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = session
        .read_request_body()
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
    {
        if body.len() + chunk.len() > max_body_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request body exceeds max size",
            ));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
