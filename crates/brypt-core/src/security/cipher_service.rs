//! `CipherService` — the per-node factory for synchronizers.

use std::sync::Arc;

use crate::error::Result;
use crate::options::SupportedAlgorithms;

use super::algorithms::ExchangeRole;
use super::synchronizer::PackageSynchronizer;
use super::wire::StageZeroMessage;

pub struct CipherService {
    supported: Arc<SupportedAlgorithms>,
}

impl CipherService {
    pub fn new(supported: SupportedAlgorithms) -> Self {
        Self { supported: Arc::new(supported) }
    }

    /// Creates a synchronizer for the given role. Initiators additionally
    /// receive the stage 0 message to send, offering every confidentiality
    /// level this service is configured for.
    pub fn create_synchronizer(
        &self,
        role: ExchangeRole,
    ) -> Result<(PackageSynchronizer, Option<StageZeroMessage>)> {
        match role {
            ExchangeRole::Initiator => {
                let (synchronizer, message) = PackageSynchronizer::initiate(&self.supported)?;
                Ok((synchronizer, Some(message)))
            }
            ExchangeRole::Acceptor => Ok((PackageSynchronizer::accept(Arc::clone(&self.supported)), None)),
        }
    }

    pub fn supported_algorithms(&self) -> &SupportedAlgorithms {
        &self.supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptor_synchronizer_has_no_stage_zero_message() {
        let service = CipherService::new(SupportedAlgorithms::default());
        let (_, message) = service.create_synchronizer(ExchangeRole::Acceptor).unwrap();
        assert!(message.is_none());
    }

    #[test]
    fn initiator_synchronizer_emits_stage_zero_message() {
        let service = CipherService::new(SupportedAlgorithms::default());
        let (_, message) = service.create_synchronizer(ExchangeRole::Initiator).unwrap();
        assert!(message.is_some());
    }
}
