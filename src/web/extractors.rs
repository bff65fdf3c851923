use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Caller supplied `X-Request-ID`, or a fresh v4 UUID.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RequestId(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> RequestId {
        let (mut parts, _) = req.into_parts();
        RequestId::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn uses_header_when_present() {
        let req = Request::builder()
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.0, "abc-123");
    }

    #[tokio::test]
    async fn generates_uuid_otherwise() {
        let id = extract(Request::builder().body(()).unwrap()).await.0;
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
