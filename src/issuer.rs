use std::fmt;

use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::IssuerConfig,
    error::IssuerError,
    link::invite_link,
    model::{InviteToken, User},
    store::Collection,
    token::{mint_token, InviteSecret},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// An active token existed. Its secret can't be recovered from the hash,
    /// so it was marked used and replaced.
    Regenerated,
    /// No active token existed, so one was minted for the pending owner.
    MintedForOwner,
}

/// Everything the operator needs to see. `secret` is the only copy of the
/// plaintext and is already embedded in `link`.
#[derive(Clone)]
pub struct IssuedInvite {
    pub outcome: IssueOutcome,
    pub token: InviteToken,
    pub secret: InviteSecret,
    pub link: Url,
    /// Ids of tokens marked used by this run, oldest first.
    pub invalidated: Vec<String>,
    /// The invitee, when the user store could be read.
    pub user: Option<User>,
}

// The link's query holds the secret, so Debug shows the link without it.
impl fmt::Debug for IssuedInvite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut link = self.link.clone();
        link.set_query(None);

        f.debug_struct("IssuedInvite")
            .field("outcome", &self.outcome)
            .field("token", &self.token)
            .field("secret", &self.secret)
            .field("link", &link.as_str())
            .field("invalidated", &self.invalidated)
            .field("user", &self.user)
            .finish()
    }
}

/// Makes sure exactly one fresh, unused invite exists and returns a link for
/// it.
///
/// If an active token is found (first in store order), it is invalidated and
/// replaced for the same user and agency. Otherwise the first OWNER user
/// still in INVITED status gets a new token, and every other unused token of
/// theirs is marked used, expired or not.
///
/// Nothing is written unless a token is minted. Neither collection is locked,
/// so two concurrent runs can lose each other's writes.
pub fn ensure_active_invite_link<T, U>(
    tokens: &mut T,
    users: &mut U,
    config: &IssuerConfig,
    now_ms: i64,
) -> Result<IssuedInvite, IssuerError>
where
    T: Collection<InviteToken>,
    U: Collection<User>,
{
    tokens.load()?;

    let active = tokens.find(&|t: &InviteToken| t.is_active(now_ms)).cloned();

    match active {
        Some(active) => regenerate(tokens, users, config, now_ms, active),
        None => {
            debug!("no active invite token, looking for a pending owner");
            mint_for_pending_owner(tokens, users, config, now_ms)
        }
    }
}

fn regenerate<T, U>(
    tokens: &mut T,
    users: &mut U,
    config: &IssuerConfig,
    now_ms: i64,
    active: InviteToken,
) -> Result<IssuedInvite, IssuerError>
where
    T: Collection<InviteToken>,
    U: Collection<User>,
{
    info!(token_id = %active.id, user_id = %active.user_id, "found active invite token, replacing it");

    let minted = mint_token(&active.agency_id, &active.user_id, now_ms, config.ttl)?;
    let link = invite_link(&config.base_url, &minted.secret, &minted.record.agency_id)?;

    let invalidated = tokens.update_where(&|t: &InviteToken| t.id == active.id, &mut |t: &mut InviteToken| {
        t.mark_used(now_ms)
    });
    tokens.upsert(minted.record.clone());
    tokens.persist()?;

    info!(token_id = %minted.record.id, "minted replacement invite token");

    // Only used to name the invitee in the report.
    let user = match users.load() {
        Ok(()) => users.get(&active.user_id).cloned(),
        Err(IssuerError::MissingDataFile { .. }) => None,
        Err(e) => {
            warn!("couldn't read users for the report: {}", e);
            None
        }
    };

    Ok(IssuedInvite {
        outcome: IssueOutcome::Regenerated,
        token: minted.record,
        secret: minted.secret,
        link,
        invalidated,
        user,
    })
}

fn mint_for_pending_owner<T, U>(
    tokens: &mut T,
    users: &mut U,
    config: &IssuerConfig,
    now_ms: i64,
) -> Result<IssuedInvite, IssuerError>
where
    T: Collection<InviteToken>,
    U: Collection<User>,
{
    users.load()?;

    let owner = users
        .find(&|u: &User| u.is_pending_owner())
        .cloned()
        .ok_or(IssuerError::NoPendingOwner)?;

    info!(user_id = %owner.id, agency_id = %owner.agency_id, "minting invite token for pending owner");

    let minted = mint_token(&owner.agency_id, &owner.id, now_ms, config.ttl)?;
    let link = invite_link(&config.base_url, &minted.secret, &minted.record.agency_id)?;

    // Broader than the active check: expired but unused tokens are closed too.
    let invalidated = tokens.update_where(
        &|t: &InviteToken| t.user_id == owner.id && t.is_unused(),
        &mut |t: &mut InviteToken| t.mark_used(now_ms),
    );
    if !invalidated.is_empty() {
        debug!("invalidated {} earlier tokens for {}", invalidated.len(), owner.id);
    }

    tokens.upsert(minted.record.clone());
    tokens.persist()?;

    Ok(IssuedInvite {
        outcome: IssueOutcome::MintedForOwner,
        token: minted.record,
        secret: minted.secret,
        link,
        invalidated,
        user: Some(owner),
    })
}
