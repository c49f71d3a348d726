//! Read-side projections of the hub: the live presence list and the
//! members view.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use secchat_db::StoreHandle;
use secchat_types::models::User;

/// Overlay persisted avatars onto live users. A connection's cached avatar
/// can lag behind storage, so a non-empty stored value wins.
pub fn merge_avatars(mut online: Vec<User>, stored: &[User]) -> Vec<User> {
    let stored_avatars: HashMap<&str, &str> = stored
        .iter()
        .filter(|u| !u.avatar.is_empty())
        .map(|u| (u.id.as_str(), u.avatar.as_str()))
        .collect();

    for user in &mut online {
        if let Some(avatar) = stored_avatars.get(user.id.as_str()) {
            user.avatar = avatar.to_string();
        }
    }
    online
}

/// [`merge_avatars`] against the live store. If storage is unavailable the
/// cached avatars are returned as-is.
pub async fn with_stored_avatars(online: Vec<User>, store: &StoreHandle) -> Vec<User> {
    match store.get_users().await {
        Ok(stored) => merge_avatars(online, &stored),
        Err(e) => {
            warn!("Presence avatar lookup failed, using cached avatars: {}", e);
            online
        }
    }
}

/// Every stored user with `online` recomputed from the hub's live ids.
pub fn annotate_members(stored: Vec<User>, online_ids: &HashSet<String>) -> Vec<User> {
    stored
        .into_iter()
        .map(|mut user| {
            user.online = online_ids.contains(&user.id);
            user
        })
        .collect()
}
