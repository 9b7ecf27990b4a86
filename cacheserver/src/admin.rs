use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, Response, StatusCode};
use pingora::apps::http_app::ServeHttp;
use pingora::protocols::http::ServerSession;
use serde::{Deserialize, Serialize};

use diskaio::{FaultInjector, IoFault};

use crate::util::{read_full_server_request_body, response_json, response_no_body};

const MAX_ADMIN_BODY: usize = 64 * 1024;

#[derive(Debug, Serialize, Clone)]
enum Error {
    Read,
    BadBody,
    BadRegex,
}

#[derive(Serialize)]
struct ErrorBody {
    error: Error,
}

impl From<Error> for Response<Vec<u8>> {
    fn from(val: Error) -> Self {
        response_json(StatusCode::BAD_REQUEST, ErrorBody { error: val })
    }
}

#[derive(Deserialize)]
struct InjectFaultRequest {
    path_regex: String,
    op_index: usize,
    errno: i32,
    skip_io: bool,
}

/// A small control surface for fault injection: lets a test harness
/// schedule deterministic disk faults against a running server without
/// restarting it.
pub struct Admin {
    fault_injector: Arc<FaultInjector>,
}

impl Admin {
    pub fn new(fault_injector: Arc<FaultInjector>) -> Self {
        Self { fault_injector }
    }

    async fn inject_fault(&self, session: &mut ServerSession) -> Result<Response<Vec<u8>>, Error> {
        let body = read_full_server_request_body(session, MAX_ADMIN_BODY)
            .await
            .map_err(|_| Error::Read)?;
        let req: InjectFaultRequest = serde_json::from_slice(&body).map_err(|_| Error::BadBody)?;
        self.fault_injector
            .inject_fault(
                &req.path_regex,
                req.op_index,
                IoFault {
                    errno: req.errno,
                    skip_io: req.skip_io,
                },
            )
            .map_err(|_| Error::BadRegex)?;
        Ok(response_no_body(StatusCode::OK))
    }
}

#[async_trait]
impl ServeHttp for Admin {
    async fn response(&self, session: &mut ServerSession) -> Response<Vec<u8>> {
        let req_parts: &http::request::Parts = session.req_header();
        let res = match (req_parts.method.clone(), req_parts.uri.path()) {
            (Method::POST, "/admin/fault") => self.inject_fault(session).await,
            _ => return response_no_body(StatusCode::NOT_FOUND),
        };
        res.unwrap_or_else(|e| e.into())
    }
}
