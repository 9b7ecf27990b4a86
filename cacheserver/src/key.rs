use cachecore::CryptoKey;

/// The minimum request-to-key mapping needed to exercise the cache over
/// a socket. Normalizes only on scheme+host+path+query, the same fields
/// a real remap layer would URL-normalize before keying — no
/// Vary-header alternate selection beyond the single request_digest this
/// produces.
pub fn object_key(uri: &http::Uri) -> CryptoKey {
    CryptoKey::from_bytes(0, uri.to_string().as_bytes())
}

/// The alternate-selection digest : derived from the request's
/// `Accept-Encoding` header alone, standing in for a real Vary-header
/// computation a remap layer would otherwise supply.
pub fn request_digest(parts: &http::request::Parts) -> u64 {
    let accept_encoding = parts
        .headers
        .get(http::header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let key = CryptoKey::from_bytes(1, accept_encoding.as_bytes());
    key.u64_0()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_uri_same_key() {
        let a: http::Uri = "/foo/bar?x=1".parse().unwrap();
        let b: http::Uri = "/foo/bar?x=1".parse().unwrap();
        assert_eq!(object_key(&a), object_key(&b));
    }

    #[test]
    fn different_path_different_key() {
        let a: http::Uri = "/foo".parse().unwrap();
        let b: http::Uri = "/bar".parse().unwrap();
        assert_ne!(object_key(&a), object_key(&b));
    }
}
