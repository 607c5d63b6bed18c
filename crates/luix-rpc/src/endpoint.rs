//! Endpoint factories build the servers and requesters of one protocol

use crate::client::{Requester, tcp::TcpRequester};
use crate::codec::{Codec, codecs};
use crate::config::{DEFAULT_CODEC, DEFAULT_SERIALIZER};
use crate::error::Result;
use crate::serializer::{Serializer, serializers};
use crate::server::{MessageHandler, Server, tcp::TcpServer};
use luix_registry::{Spawner, Strategies, Url, url::DEFAULT_PROTOCOL, url::keys};
use std::sync::Arc;

/// Builds transport endpoints for a protocol
pub trait EndpointFactory: Send + Sync {
    /// Protocol name
    fn name(&self) -> &'static str;

    /// Create an unopened server for a provider URL
    fn create_server(&self, url: &Url, handler: Arc<dyn MessageHandler>)
    -> Result<Arc<dyn Server>>;

    /// Create a requester for a consumer URL
    fn create_requester(&self, url: &Url) -> Result<Arc<dyn Requester>>;
}

/// TCP endpoints speaking the frame codec
pub struct LuixEndpointFactory {
    spawner: Arc<dyn Spawner>,
    codecs: Strategies<Arc<dyn Codec>>,
    serializers: Strategies<Arc<dyn Serializer>>,
}

impl LuixEndpointFactory {
    /// Factory with the built-in codecs and serializers
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            spawner,
            codecs: codecs(),
            serializers: serializers(),
        }
    }

    fn codec_and_serializer(&self, url: &Url) -> Result<(Arc<dyn Codec>, Arc<dyn Serializer>)> {
        let codec = self
            .codecs
            .create(&url.option_or(keys::CODEC, DEFAULT_CODEC))?;
        let serializer = self
            .serializers
            .create(&url.option_or(keys::SERIALIZER, DEFAULT_SERIALIZER))?;
        Ok((codec, serializer))
    }
}

impl EndpointFactory for LuixEndpointFactory {
    fn name(&self) -> &'static str {
        DEFAULT_PROTOCOL
    }

    fn create_server(
        &self,
        url: &Url,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn Server>> {
        let (codec, serializer) = self.codec_and_serializer(url)?;
        Ok(Arc::new(TcpServer::new(
            url.clone(),
            handler,
            codec,
            serializer,
            self.spawner.clone(),
        )))
    }

    fn create_requester(&self, url: &Url) -> Result<Arc<dyn Requester>> {
        let (codec, serializer) = self.codec_and_serializer(url)?;
        Ok(Arc::new(TcpRequester::new(
            url,
            codec,
            serializer,
            self.spawner.clone(),
        )))
    }
}

/// Built-in endpoint factories
pub fn endpoint_factories(spawner: Arc<dyn Spawner>) -> Strategies<Arc<dyn EndpointFactory>> {
    Strategies::new("endpoint factory").with(DEFAULT_PROTOCOL, move || {
        Arc::new(LuixEndpointFactory::new(spawner.clone())) as Arc<dyn EndpointFactory>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use luix_registry::SmolSpawner;

    #[test]
    fn test_unknown_serializer_is_configuration_error() {
        let factory = LuixEndpointFactory::new(Arc::new(SmolSpawner));
        let url = Url::parse("luix://127.0.0.1:0/Svc?serializer=hessian").unwrap();
        assert!(matches!(
            factory.create_requester(&url),
            Err(Error::Configuration(ref m)) if m.contains("serializer")
        ));
    }

    #[test]
    fn test_default_factory_registered() {
        let factories = endpoint_factories(Arc::new(SmolSpawner));
        assert_eq!(factories.names(), vec![DEFAULT_PROTOCOL.to_string()]);
        assert!(matches!(
            factories.create("thrift"),
            Err(luix_registry::Error::Configuration(_))
        ));
    }
}
