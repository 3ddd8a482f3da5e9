use std::sync::Arc;

use clerk::{Clock, SystemClock, TokenStore};

use super::{
    config::Config,
    database::DocumentStore,
    dispatch::Services,
    identity::{GoogleVerifier, IdentityVerifier},
    pipeline::AdmissionPipeline,
    verbs,
};

pub struct State {
    pub config: Config,
    pub tokens: Arc<TokenStore>,
    pub pipeline: AdmissionPipeline,
}

impl State {
    pub async fn new() -> anyhow::Result<Arc<Self>> {
        let config = Config::load()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let documents = Arc::new(DocumentStore::load(&config.json_dir).await);
        let identity = Arc::new(GoogleVerifier::new(
            config.gapi_client_id.clone(),
            clock.clone(),
            documents.clone(),
        ));

        Ok(Self::assemble(config, clock, documents, identity))
    }

    /// Wires one token store into the pipeline and the verb handlers.
    pub fn assemble(
        config: Config,
        clock: Arc<dyn Clock>,
        documents: Arc<DocumentStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Arc<Self> {
        let tokens = Arc::new(TokenStore::new(config.store_config(), clock.clone()));

        let dispatcher = verbs::dispatcher(Services {
            tokens: tokens.clone(),
            documents,
            identity,
        });
        let pipeline = AdmissionPipeline::new(tokens.clone(), dispatcher, clock);

        Arc::new(Self {
            config,
            tokens,
            pipeline,
        })
    }
}
