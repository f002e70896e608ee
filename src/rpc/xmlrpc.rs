//! XML-RPC over HTTP (spec §1: "XML-RPC over HTTP; binary RPC and JSON-RPC
//! over either a raw socket or HTTP").
//!
//! Adapts a [`ServiceRegistry`] to the HTTP layer's [`Service`]/[`Responder`]
//! traits, so an XML-RPC endpoint can be routed by [`crate::http::Router`]
//! alongside any other HTTP service the teacher's `http/server.rs` serves.

use crate::codec::xml::{decode_message, encode_fault, encode_response, Message};
use crate::error::{Error, Result};
use crate::http::{Responder, Service};
use crate::rpc::ServiceRegistry;
use http::{header, Request, Response, StatusCode};
use std::sync::Arc;

/// Routable XML-RPC endpoint. One instance can be mounted at a path prefix
/// (conventionally `/RPC2`) via [`crate::http::Router::route_prefix`].
pub struct XmlRpcService {
    registry: Arc<ServiceRegistry>,
}

impl XmlRpcService {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

impl Service for XmlRpcService {
    fn acquire(&self) -> Box<dyn Responder> {
        Box::new(XmlRpcResponder { registry: self.registry.clone(), body: Vec::new() })
    }
}

struct XmlRpcResponder {
    registry: Arc<ServiceRegistry>,
    body: Vec<u8>,
}

#[async_trait::async_trait]
impl Responder for XmlRpcResponder {
    async fn begin_request(&mut self, _request: &Request<()>) -> Result<()> {
        self.body.clear();
        Ok(())
    }

    async fn read_body(&mut self, chunk: &[u8]) -> Result<()> {
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    async fn reply(&mut self, _request: &Request<()>) -> Result<Response<Vec<u8>>> {
        let body = match decode_message(&self.body) {
            Ok(Message::Call { method, params }) => match self.registry.dispatch(&method, params).await {
                Ok(result) => encode_response(&result),
                Err(e) => {
                    let fault = e.to_fault();
                    encode_fault(fault.code, &fault.message)
                }
            },
            Ok(_) => encode_fault(-32600, "expected a methodCall"),
            Err(e) => encode_fault(-32700, &e.to_string()),
        }
        .map_err(|e| Error::Protocol(e.to_string()))?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/xml")
            .header(header::CONTENT_LENGTH, body.len())
            .body(body)
            .expect("well-formed XML-RPC response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ServiceProcedure;
    use crate::si::SerializationInfo;
    use async_trait::async_trait;

    struct Add;

    #[async_trait]
    impl ServiceProcedure for Add {
        fn name(&self) -> &str {
            "add"
        }

        async fn invoke(&self, args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
            let a = args[0].get_value::<i64>().unwrap_or(0);
            let b = args[1].get_value::<i64>().unwrap_or(0);
            let mut result = SerializationInfo::new();
            result.set_signed(a + b);
            Ok(result)
        }
    }

    fn head() -> Request<()> {
        Request::builder().method("POST").uri("/RPC2").body(()).unwrap()
    }

    #[tokio::test]
    async fn dispatches_methodcall_and_encodes_methodresponse() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(Arc::new(Add)).unwrap();
        let service = XmlRpcService::new(registry);
        let mut responder = service.acquire();

        let request_body = b"<methodCall><methodName>add</methodName><params>\
            <param><value><int>2</int></value></param>\
            <param><value><int>3</int></value></param>\
            </params></methodCall>";

        responder.begin_request(&head()).await.unwrap();
        responder.read_body(request_body).await.unwrap();
        let response = responder.reply(&head()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(response.body().clone()).unwrap();
        assert!(body.contains("<methodResponse>"));
        assert!(body.contains("<i4>5</i4>"));
    }

    #[tokio::test]
    async fn unknown_method_replies_with_fault() {
        let registry = Arc::new(ServiceRegistry::new());
        let service = XmlRpcService::new(registry);
        let mut responder = service.acquire();

        let request_body = b"<methodCall><methodName>nope</methodName><params></params></methodCall>";
        responder.begin_request(&head()).await.unwrap();
        responder.read_body(request_body).await.unwrap();
        let response = responder.reply(&head()).await.unwrap();

        let body = String::from_utf8(response.body().clone()).unwrap();
        assert!(body.contains("<fault>"));
        assert!(body.contains("faultString"));
    }
}
