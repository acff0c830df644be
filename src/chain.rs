// ============================================================================
// Redirect-Chain URL Construction
// ============================================================================
//
// Login and logout cannot be pure server calls: only the user's browser
// can receive another origin's session cookie. The chain is therefore a
// stateless browser walk, and *all* of its progress lives in the URLs
// built here:
//
//   master --303--> slave[i] --303--> master(start=i+1) --303--> ...
//
// Only the master advances the cursor; a slave just performs its local
// effect and bounces to the `returnTo` it was handed. Consecutive hops
// may be served by different physical hosts, which is exactly why none
// of this state is kept server-side.
//
// ============================================================================

use anyhow::{Context, Result};
use url::Url;

use crate::keys::subject_key;
use crate::member::IdType;
use crate::store::SlaveSite;
use crate::wire::Action;

/// Everything a hop redirect needs that is not peer-specific.
pub struct ChainState<'a> {
    pub action: Action,
    pub subject_id: &'a str,
    pub id_type: IdType,
    /// This (master) installation's own endpoint URL.
    pub master_url: &'a str,
    /// This installation's own secret, used to authenticate the
    /// continuation hit when the browser comes back to us.
    pub master_secret: &'a str,
    /// Original caller url, threaded through so the exclusion filter
    /// stays stable across hops.
    pub caller_url: Option<&'a str>,
    /// Final destination supplied by the original caller.
    pub orig_return: Option<&'a str>,
}

/// Build the continuation URL a slave will bounce the browser back to.
/// `next_cursor` is the number of peers visited once this hop lands.
pub fn build_return_to(state: &ChainState<'_>, next_cursor: usize) -> Result<String> {
    let mut url = Url::parse(state.master_url).context("master url is not a valid URL")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("action", state.action.name());
        query.append_pair("slaveReturn", "1");
        query.append_pair("start", &next_cursor.to_string());
        query.append_pair("key", &subject_key(state.master_secret, state.subject_id));
        query.append_pair("id", state.subject_id);
        query.append_pair("idType", state.id_type.to_wire());
        if let Some(caller) = state.caller_url {
            query.append_pair("url", caller);
        }
        if let Some(orig) = state.orig_return {
            query.append_pair("origReturn", orig);
        }
    }
    Ok(url.into())
}

/// Build the 303 target for one slave hop. The key is computed for that
/// specific peer's secret; the same logical event carries a different
/// token per destination.
pub fn build_hop(state: &ChainState<'_>, slave: &SlaveSite, next_cursor: usize) -> Result<String> {
    let return_to = build_return_to(state, next_cursor)?;

    let mut url = Url::parse(&slave.url).context("slave url is not a valid URL")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("action", state.action.name());
        query.append_pair("slaveCall", "1");
        query.append_pair("key", &subject_key(&slave.secret, state.subject_id));
        query.append_pair("id", state.subject_id);
        query.append_pair("idType", state.id_type.to_wire());
        query.append_pair("url", state.master_url);
        query.append_pair("returnTo", &return_to);
        if let Some(orig) = state.orig_return {
            query.append_pair("origReturn", orig);
        }
    }
    Ok(url.into())
}

/// Open-redirect guard: when an interactive hit fails its key check, we
/// only bounce the browser if the referrer's host matches the requested
/// destination's host. Otherwise the failure path would be a probe
/// oracle for arbitrary redirects.
pub fn referrer_matches(referrer: Option<&str>, destination: &str) -> bool {
    let Some(referrer) = referrer else {
        return false;
    };
    let (Ok(referrer), Ok(destination)) = (Url::parse(referrer), Url::parse(destination)) else {
        return false;
    };
    match (referrer.host_str(), destination.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn slave(url: &str, secret: &str) -> SlaveSite {
        SlaveSite {
            id: Uuid::new_v4(),
            url: url.to_string(),
            secret: secret.to_string(),
            enabled: true,
            last_access: Utc::now(),
            created_at: Utc::now(),
        }
    }

    fn state<'a>() -> ChainState<'a> {
        ChainState {
            action: Action::Login,
            subject_id: "member-7",
            id_type: IdType::Username,
            master_url: "https://master.example/api/v1/sync",
            master_secret: "master-secret",
            caller_url: None,
            orig_return: Some("https://master.example/forum"),
        }
    }

    fn query_value(url: &str, name: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn hop_carries_per_peer_key_and_direction_flag() {
        let peer = slave("https://b.example/api/v1/sync", "b-secret");
        let hop = build_hop(&state(), &peer, 1).unwrap();

        assert_eq!(query_value(&hop, "slaveCall").as_deref(), Some("1"));
        assert_eq!(
            query_value(&hop, "key").as_deref(),
            Some(subject_key("b-secret", "member-7").as_str())
        );
    }

    #[test]
    fn return_to_embeds_the_advanced_cursor_and_orig_return() {
        let peer = slave("https://b.example/api/v1/sync", "b-secret");
        let hop = build_hop(&state(), &peer, 3).unwrap();

        let return_to = query_value(&hop, "returnTo").unwrap();
        assert_eq!(query_value(&return_to, "start").as_deref(), Some("3"));
        assert_eq!(query_value(&return_to, "slaveReturn").as_deref(), Some("1"));
        assert_eq!(
            query_value(&return_to, "origReturn").as_deref(),
            Some("https://master.example/forum")
        );
        // The continuation authenticates against the master's own secret.
        assert_eq!(
            query_value(&return_to, "key").as_deref(),
            Some(subject_key("master-secret", "member-7").as_str())
        );
    }

    #[test]
    fn referrer_guard_compares_hosts_only() {
        assert!(referrer_matches(
            Some("https://master.example/login?x=1"),
            "https://master.example/forum"
        ));
        assert!(!referrer_matches(
            Some("https://evil.example/"),
            "https://master.example/forum"
        ));
        assert!(!referrer_matches(None, "https://master.example/forum"));
        assert!(!referrer_matches(Some("not a url"), "https://master.example/"));
    }
}
