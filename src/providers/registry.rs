use crate::providers::{aggregator, botscout, forumspam, httpbl};
use crate::providers::{ProviderId, ReputationProvider};

/// The reputation sources in their fixed priority order: the licensed
/// aggregator first, then the independent services. The set is explicit;
/// enable/disable happens in configuration, not by mutating this list.
#[derive(Clone, Copy)]
pub struct ProviderRegistry {
    order: [&'static dyn ReputationProvider; 4],
}

impl ProviderRegistry {
    pub fn standard() -> Self {
        ProviderRegistry {
            order: [
                &aggregator::AGGREGATOR,
                &forumspam::FORUMSPAM,
                &botscout::BOTSCOUT,
                &httpbl::HTTPBL,
            ],
        }
    }

    pub fn in_priority_order(&self) -> impl Iterator<Item = &'static dyn ReputationProvider> + '_ {
        self.order.iter().copied()
    }

    pub fn by_id(&self, id: ProviderId) -> Option<&'static dyn ReputationProvider> {
        self.order.iter().copied().find(|p| p.id() == id)
    }
}
