// ============================================================================
// Account Mutation Handlers
// ============================================================================
//
// The receiving side of the mutation propagator: a peer applied a
// lifecycle change and is replaying it here. Delivery is at-least-once,
// so every handler must tolerate seeing the same payload twice. The
// naturally idempotent ones (set email to X) need nothing special; the
// destructive ones (merge, delete) treat "subject already absent" as a
// silent success instead of an error, because that is what a replayed
// completed operation looks like.
//
// ============================================================================

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventType};
use crate::context::AppContext;
use crate::error::{SyncError, SyncResult};
use crate::keys;
use crate::member::{resolve_subject, Member, MemberStore};
use crate::request::RequestContext;
use crate::wire::Action;

pub async fn handle_mutation(
    ctx: &AppContext,
    action: Action,
    rc: &RequestContext,
) -> SyncResult<Map<String, Value>> {
    let subject_id = rc
        .subject_id
        .as_deref()
        .ok_or(SyncError::MissingField("id"))?;

    if !keys::verify_subject(&rc.key, &ctx.config.secret, subject_id) {
        AuditEvent::new(AuditEventType::AuthenticationFailure)
            .subject(subject_id, &ctx.config.log_hash_salt)
            .peer(rc.caller_url.as_deref().unwrap_or("-"))
            .detail(format!("bad subject key for {}", action.name()))
            .emit(false);
        return Err(SyncError::BadKey);
    }

    match action {
        Action::Register => register(ctx, rc, subject_id).await?,
        Action::Validate => validate(ctx, rc, subject_id).await?,
        Action::Ban => ban(ctx, rc, subject_id).await?,
        Action::Merge => merge(ctx, rc, subject_id).await?,
        Action::ChangeEmail => change_email(ctx, rc, subject_id).await?,
        Action::ChangePassword => change_password(ctx, rc, subject_id).await?,
        Action::ChangeName => change_name(ctx, rc, subject_id).await?,
        Action::Delete => delete(ctx, rc, subject_id).await?,
        // login/logout/verifySettings never reach this path.
        _ => return Err(SyncError::InvalidAction(action.name().to_string())),
    }

    AuditEvent::new(AuditEventType::MutationApplied)
        .subject(subject_id, &ctx.config.log_hash_salt)
        .peer(rc.caller_url.as_deref().unwrap_or("-"))
        .detail(action.name())
        .emit(rc.slave_call);

    Ok(Map::new())
}

async fn find(ctx: &AppContext, rc: &RequestContext, id: &str) -> SyncResult<Option<Member>> {
    Ok(resolve_subject(ctx.members.as_ref(), id, rc.id_type).await?)
}

async fn require(ctx: &AppContext, rc: &RequestContext, id: &str) -> SyncResult<Member> {
    find(ctx, rc, id).await?.ok_or(SyncError::NotFound)
}

async fn register(ctx: &AppContext, rc: &RequestContext, subject_id: &str) -> SyncResult<()> {
    let username = rc
        .extras
        .username
        .as_deref()
        .ok_or(SyncError::MissingField("username"))?;
    let email = rc
        .extras
        .email
        .as_deref()
        .ok_or(SyncError::MissingField("email"))?;
    let password_hash = rc
        .extras
        .password
        .as_deref()
        .ok_or(SyncError::MissingField("password"))?;

    // Replay, or an account that predates federation: link it to the
    // propagated identity instead of creating a duplicate.
    if let Some(mut existing) = find(ctx, rc, subject_id).await? {
        if existing.external_id.as_deref() != Some(subject_id) {
            existing.external_id = Some(subject_id.to_string());
            ctx.members.save(&existing).await?;
        }
        return Ok(());
    }
    if let Some(mut existing) = ctx.members.find_by_username(username).await? {
        existing.external_id = Some(subject_id.to_string());
        ctx.members.save(&existing).await?;
        return Ok(());
    }

    ctx.members
        .create(&Member {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            validated: false,
            banned: false,
            external_id: Some(subject_id.to_string()),
        })
        .await?;
    Ok(())
}

async fn validate(ctx: &AppContext, rc: &RequestContext, subject_id: &str) -> SyncResult<()> {
    let mut member = require(ctx, rc, subject_id).await?;
    member.validated = true;
    ctx.members.save(&member).await?;
    Ok(())
}

async fn ban(ctx: &AppContext, rc: &RequestContext, subject_id: &str) -> SyncResult<()> {
    let mut member = require(ctx, rc, subject_id).await?;
    member.banned = !rc.extras.remove;
    ctx.members.save(&member).await?;
    Ok(())
}

async fn merge(ctx: &AppContext, rc: &RequestContext, subject_id: &str) -> SyncResult<()> {
    let dest_id = rc
        .extras
        .dest_id
        .as_deref()
        .ok_or(SyncError::MissingField("destId"))?;

    // Source already gone: the merge was applied on a previous
    // delivery. Report success so the sender stops retrying.
    let Some(source) = find(ctx, rc, subject_id).await? else {
        return Ok(());
    };
    let dest = require(ctx, rc, dest_id).await?;
    ctx.members.merge(source.id, dest.id).await?;
    Ok(())
}

async fn change_email(ctx: &AppContext, rc: &RequestContext, subject_id: &str) -> SyncResult<()> {
    let email = rc
        .extras
        .email
        .as_deref()
        .ok_or(SyncError::MissingField("email"))?;
    let mut member = require(ctx, rc, subject_id).await?;
    member.email = email.to_string();
    ctx.members.save(&member).await?;
    Ok(())
}

async fn change_password(
    ctx: &AppContext,
    rc: &RequestContext,
    subject_id: &str,
) -> SyncResult<()> {
    // The propagated value is the already-computed hash; this node
    // never sees the plaintext.
    let password_hash = rc
        .extras
        .password
        .as_deref()
        .ok_or(SyncError::MissingField("password"))?;
    let mut member = require(ctx, rc, subject_id).await?;
    member.password_hash = password_hash.to_string();
    ctx.members.save(&member).await?;
    Ok(())
}

async fn change_name(ctx: &AppContext, rc: &RequestContext, subject_id: &str) -> SyncResult<()> {
    let name = rc
        .extras
        .name
        .as_deref()
        .ok_or(SyncError::MissingField("name"))?;
    let mut member = require(ctx, rc, subject_id).await?;
    member.username = name.to_string();
    ctx.members.save(&member).await?;
    Ok(())
}

async fn delete(ctx: &AppContext, rc: &RequestContext, subject_id: &str) -> SyncResult<()> {
    // Absent subject on a replayed delete is a completed delete.
    let Some(member) = find(ctx, rc, subject_id).await? else {
        return Ok(());
    };
    ctx.members.delete(member.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::subject_key;
    use crate::test_support::harness;

    fn mutation_request(action: Action, secret: &str, subject_id: &str) -> RequestContext {
        let mut rc = RequestContext::from_params(Default::default());
        rc.action = action.name().to_string();
        rc.key = subject_key(secret, subject_id);
        rc.subject_id = Some(subject_id.to_string());
        rc.slave_call = true;
        rc.caller_url = Some("https://master.example/api/v1/sync".to_string());
        rc
    }

    fn seeded_member(external_id: &str) -> Member {
        Member {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@a.example".to_string(),
            password_hash: "$2b$old".to_string(),
            validated: true,
            banned: false,
            external_id: Some(external_id.to_string()),
        }
    }

    #[tokio::test]
    async fn register_creates_a_linked_unvalidated_account() {
        let h = harness("secret");
        let mut rc = mutation_request(Action::Register, "secret", "master-7");
        rc.extras.username = Some("alice".into());
        rc.extras.email = Some("alice@a.example".into());
        rc.extras.password = Some("$2b$hash".into());

        handle_mutation(&h.ctx, Action::Register, &rc).await.unwrap();

        let member = h.members.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(member.external_id.as_deref(), Some("master-7"));
        assert!(!member.validated);

        // Replay: no duplicate account.
        handle_mutation(&h.ctx, Action::Register, &rc).await.unwrap();
        assert_eq!(h.members.len().await, 1);
    }

    #[tokio::test]
    async fn register_links_a_preexisting_local_account() {
        let h = harness("secret");
        let mut local = seeded_member("unused");
        local.external_id = None;
        h.members.insert(local).await;

        let mut rc = mutation_request(Action::Register, "secret", "master-7");
        rc.extras.username = Some("alice".into());
        rc.extras.email = Some("alice@a.example".into());
        rc.extras.password = Some("$2b$hash".into());
        handle_mutation(&h.ctx, Action::Register, &rc).await.unwrap();

        assert_eq!(h.members.len().await, 1);
        let member = h.members.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(member.external_id.as_deref(), Some("master-7"));
    }

    #[tokio::test]
    async fn change_password_is_idempotent_on_replay() {
        let h = harness("secret");
        h.members.insert(seeded_member("master-7")).await;

        let mut rc = mutation_request(Action::ChangePassword, "secret", "master-7");
        rc.extras.password = Some("$2b$new".into());

        handle_mutation(&h.ctx, Action::ChangePassword, &rc).await.unwrap();
        handle_mutation(&h.ctx, Action::ChangePassword, &rc).await.unwrap();

        let member = h.members.find_by_external_id("master-7").await.unwrap().unwrap();
        assert_eq!(member.password_hash, "$2b$new");
    }

    #[tokio::test]
    async fn mutations_reject_a_key_scoped_to_another_subject() {
        let h = harness("secret");
        h.members.insert(seeded_member("master-7")).await;

        let mut rc = mutation_request(Action::Ban, "secret", "master-7");
        rc.key = subject_key("secret", "master-8");
        assert!(matches!(
            handle_mutation(&h.ctx, Action::Ban, &rc).await,
            Err(SyncError::BadKey)
        ));
        let member = h.members.find_by_external_id("master-7").await.unwrap().unwrap();
        assert!(!member.banned);
    }

    #[tokio::test]
    async fn ban_and_unban_follow_the_remove_flag() {
        let h = harness("secret");
        h.members.insert(seeded_member("master-7")).await;

        let rc = mutation_request(Action::Ban, "secret", "master-7");
        handle_mutation(&h.ctx, Action::Ban, &rc).await.unwrap();
        assert!(h.members.find_by_external_id("master-7").await.unwrap().unwrap().banned);

        let mut rc = mutation_request(Action::Ban, "secret", "master-7");
        rc.extras.remove = true;
        handle_mutation(&h.ctx, Action::Ban, &rc).await.unwrap();
        assert!(!h.members.find_by_external_id("master-7").await.unwrap().unwrap().banned);
    }

    #[tokio::test]
    async fn merge_of_an_absent_source_is_silent_success() {
        let h = harness("secret");
        let mut dest = seeded_member("master-9");
        dest.username = "bob".to_string();
        dest.email = "bob@a.example".to_string();
        h.members.insert(dest).await;

        let mut rc = mutation_request(Action::Merge, "secret", "master-7");
        rc.extras.dest_id = Some("master-9".into());

        // Source never existed here (or was merged on a prior delivery).
        handle_mutation(&h.ctx, Action::Merge, &rc).await.unwrap();
        assert_eq!(h.members.len().await, 1);
    }

    #[tokio::test]
    async fn merge_removes_the_source_account() {
        let h = harness("secret");
        h.members.insert(seeded_member("master-7")).await;
        let mut dest = seeded_member("master-9");
        dest.username = "bob".to_string();
        dest.email = "bob@a.example".to_string();
        h.members.insert(dest).await;

        let mut rc = mutation_request(Action::Merge, "secret", "master-7");
        rc.extras.dest_id = Some("master-9".into());
        handle_mutation(&h.ctx, Action::Merge, &rc).await.unwrap();

        assert!(h.members.find_by_external_id("master-7").await.unwrap().is_none());
        assert!(h.members.find_by_external_id("master-9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_twice_reports_success_both_times() {
        let h = harness("secret");
        h.members.insert(seeded_member("master-7")).await;

        let rc = mutation_request(Action::Delete, "secret", "master-7");
        handle_mutation(&h.ctx, Action::Delete, &rc).await.unwrap();
        handle_mutation(&h.ctx, Action::Delete, &rc).await.unwrap();
        assert!(h.members.is_empty().await);
    }

    #[tokio::test]
    async fn change_email_of_unknown_subject_is_not_found() {
        let h = harness("secret");
        let mut rc = mutation_request(Action::ChangeEmail, "secret", "ghost");
        rc.extras.email = Some("ghost@a.example".into());
        assert!(matches!(
            handle_mutation(&h.ctx, Action::ChangeEmail, &rc).await,
            Err(SyncError::NotFound)
        ));
    }
}
