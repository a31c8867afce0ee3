// ── Default-route selection ──

use crate::model::{NetworkId, Networks};

/// Pick the default route for `networks`.
///
/// The current default is kept while it is still Available. Otherwise the
/// Available instance with the highest capability rank wins, ties going to
/// the most recently added one. `None` when nothing is Available.
pub(crate) fn select_default(networks: &Networks, current: Option<&NetworkId>) -> Option<NetworkId> {
    if let Some(id) = current {
        if networks.get(id).is_some_and(|n| n.is_available()) {
            return Some(id.clone());
        }
    }

    networks
        .all()
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_available())
        .max_by_key(|(idx, n)| (n.kind().capability_rank(), *idx))
        .map(|(_, n)| n.id.clone())
}
