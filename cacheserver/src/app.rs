use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, Response, StatusCode};
use pingora::apps::http_app::ServeHttp;
use pingora::protocols::http::ServerSession;
use serde::Serialize;

use cachecore::{Alternate, AlternateVector, CacheEventCode, CacheProcessor, Doc, ReadOutcome};

use crate::bridge::{self, EventBridge};
use crate::key;
use crate::metrics;
use crate::util::{read_full_server_request_body, response_bytes, response_json, response_no_body};

const MAX_OBJECT_SIZE: usize = 64 << 20;

#[derive(Debug, Serialize, Clone)]
enum Error {
    Degraded,
    Read,
    BodyTooLarge,
    Corrupt,
    BridgeClosed,
}

#[derive(Serialize)]
struct ErrorBody {
    error: Error,
}

impl From<Error> for Response<Vec<u8>> {
    fn from(val: Error) -> Self {
        use Error::*;
        let status = match val {
            Degraded => StatusCode::SERVICE_UNAVAILABLE,
            BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Read | Corrupt | BridgeClosed => StatusCode::INTERNAL_SERVER_ERROR,
        };
        response_json(status, ErrorBody { error: val })
    }
}

/// The HTTP front door onto the cache ("cacheserver"): GET maps to
/// `open_read`/the Cache VC read path, PUT to `open_write`/`do_io_write`.
/// Neither does any actual upstream fetching or request remapping — those
/// are out of scope (Non-goals) — this only exercises the cache
/// engine itself over a socket.
pub struct CacheApp {
    processor: Arc<CacheProcessor>,
}

impl CacheApp {
    pub fn new(processor: Arc<CacheProcessor>) -> Self {
        Self { processor }
    }

    async fn handle_get(&self, session: &mut ServerSession) -> Result<Response<Vec<u8>>, Error> {
        let uri = session.req_header().uri.clone();
        let req_parts = session.req_header().clone();
        let key = key::object_key(&uri);
        let digest = key::request_digest(&req_parts);

        let vc = match self.processor.open_read_vc(key) {
            Some(vc) => vc,
            None => {
                metrics::CACHE_MISSES.inc();
                return Err(Error::Degraded);
            }
        };

        let (bridge, mut rx) = EventBridge::new();
        let mut code = vc.open_read(digest, bridge.clone());

        if code == CacheEventCode::OpenReadRww {
            metrics::CACHE_RWW_ATTACHES.inc();
            let raw = rx.recv().await.ok_or(Error::BridgeClosed)?;
            code = bridge::decode(raw).ok_or(Error::BridgeClosed)?;
        }

        match code {
            CacheEventCode::OpenReadSuccess | CacheEventCode::VcWriteComplete => {
                vc.select_alternate(digest);
                let body = match vc.begin_read(bridge.clone()) {
                    ReadOutcome::Hit(body) => body,
                    ReadOutcome::Miss => {
                        metrics::CACHE_MISSES.inc();
                        return Ok(response_no_body(StatusCode::NOT_FOUND));
                    }
                    ReadOutcome::Dispatched(request) => {
                        rx.recv().await.ok_or(Error::BridgeClosed)?;
                        vc.finish_read(&request).map_err(|_| Error::Corrupt)?
                    }
                };
                metrics::CACHE_HITS.inc();
                Ok(response_bytes(StatusCode::OK, "application/octet-stream", body))
            }
            CacheEventCode::VcEos | CacheEventCode::OpenReadFailed => {
                metrics::CACHE_MISSES.inc();
                Ok(response_no_body(StatusCode::NOT_FOUND))
            }
            _ => Ok(response_no_body(StatusCode::NOT_FOUND)),
        }
    }

    async fn handle_put(&self, session: &mut ServerSession) -> Result<Response<Vec<u8>>, Error> {
        let uri = session.req_header().uri.clone();
        let req_parts = session.req_header().clone();
        let key = key::object_key(&uri);
        let digest = key::request_digest(&req_parts);

        let body = read_full_server_request_body(session, MAX_OBJECT_SIZE)
            .await
            .map_err(|_| Error::Read)?;
        if body.len() > MAX_OBJECT_SIZE {
            return Err(Error::BodyTooLarge);
        }

        let mut vector = AlternateVector::new();
        vector.add(Alternate {
            request_digest: digest,
            response_headers: Vec::new(),
            object_key: key,
            frag_offsets: vec![],
        });

        let vc = self.processor.open_write_vc(key).ok_or(Error::Degraded)?;
        let doc = Doc::new(
            key,
            key,
            1,
            0,
            vector.to_bytes(),
            body,
            Some(cachecore::ChecksumVersion::V1),
        );

        let (k, entry) = match vc.do_io_write(&doc) {
            Ok(pair) => pair,
            Err(_) => {
                vc.do_io_close(Some(cachecore::Error::WriterAborted));
                metrics::CACHE_WRITE_ABORTS.inc();
                return Ok(response_no_body(StatusCode::INSUFFICIENT_STORAGE));
            }
        };

        let (bridge, mut rx) = EventBridge::new();
        vc.flush(vec![(k, entry)], bridge);
        rx.recv().await.ok_or(Error::BridgeClosed)?;
        vc.do_io_close(None);

        metrics::CACHE_WRITES.inc();
        Ok(response_no_body(StatusCode::CREATED))
    }
}

#[async_trait]
impl ServeHttp for CacheApp {
    async fn response(&self, session: &mut ServerSession) -> Response<Vec<u8>> {
        let req_parts: &http::request::Parts = session.req_header();
        let res = match &req_parts.method {
            &Method::GET => self.handle_get(session).await,
            &Method::PUT => self.handle_put(session).await,
            _ => return response_no_body(StatusCode::METHOD_NOT_ALLOWED),
        };
        res.unwrap_or_else(|e| e.into())
    }
}
