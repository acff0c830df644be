// ============================================================================
// Request Context
// ============================================================================
//
// The original system set `url`, `key` and friends as mutable fields on
// a long-lived handler object. Here every inbound call parses its
// parameters exactly once into this immutable value, and handlers only
// ever see the context they were given.
//
// ============================================================================

use serde::Deserialize;

use crate::member::IdType;

/// Raw query parameters of a sync call. Everything is optional at the
/// parse layer; handlers enforce what they need and answer
/// MISSING_FIELD otherwise.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    pub action: Option<String>,
    pub key: Option<String>,
    pub id: Option<String>,
    pub id_type: Option<String>,
    pub url: Option<String>,
    pub slave_call: Option<String>,
    pub slave_return: Option<String>,
    pub start: Option<String>,
    pub return_to: Option<String>,
    pub orig_return: Option<String>,
    // Operation-specific extras
    pub secret: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub remove: Option<String>,
    pub dest_id: Option<String>,
}

/// Parsed per-request state. Constructed once per inbound call, never
/// stored anywhere longer-lived than the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub action: String,
    pub key: String,
    pub subject_id: Option<String>,
    pub id_type: IdType,
    /// The caller's own canonical endpoint. Doubles as the
    /// "don't call myself" filter during chain walks and fan-out.
    pub caller_url: Option<String>,
    /// Direction flag: true when a master is relaying into us.
    pub slave_call: bool,
    /// Continuation flag: true when the browser is returning to the
    /// master mid-chain.
    pub slave_return: bool,
    /// Chain cursor: how many peers have already been visited.
    pub start: usize,
    pub return_to: Option<String>,
    pub orig_return: Option<String>,
    pub extras: Extras,
}

#[derive(Debug, Clone, Default)]
pub struct Extras {
    pub secret: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub remove: bool,
    pub dest_id: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1"))
}

impl RequestContext {
    pub fn from_params(params: SyncParams) -> Self {
        let start = params
            .start
            .as_deref()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);

        Self {
            action: params.action.unwrap_or_default(),
            key: params.key.unwrap_or_default(),
            subject_id: params.id,
            id_type: IdType::from_wire(params.id_type.as_deref()),
            caller_url: params.url,
            slave_call: flag(&params.slave_call),
            slave_return: flag(&params.slave_return),
            start,
            return_to: params.return_to,
            orig_return: params.orig_return,
            extras: Extras {
                secret: params.secret,
                username: params.username,
                email: params.email,
                password: params.password,
                name: params.name,
                remove: flag(&params.remove),
                dest_id: params.dest_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_only_literal_one() {
        let ctx = RequestContext::from_params(SyncParams {
            slave_call: Some("1".into()),
            slave_return: Some("true".into()),
            ..Default::default()
        });
        assert!(ctx.slave_call);
        assert!(!ctx.slave_return);
    }

    #[test]
    fn malformed_cursor_defaults_to_zero() {
        let ctx = RequestContext::from_params(SyncParams {
            start: Some("banana".into()),
            ..Default::default()
        });
        assert_eq!(ctx.start, 0);

        let ctx = RequestContext::from_params(SyncParams {
            start: Some("3".into()),
            ..Default::default()
        });
        assert_eq!(ctx.start, 3);
    }
}
