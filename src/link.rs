use url::Url;

use crate::{error::IssuerError, token::InviteSecret};

pub const ACCEPT_INVITE_PATH: &str = "accept-invite";

/// Parses the frontend URL the invite page is served from. Anything that
/// can't take a path (`mailto:`, `data:`) is rejected.
pub fn parse_base_url(raw: &str) -> Result<Url, IssuerError> {
    let url = Url::parse(raw.trim()).map_err(|_| IssuerError::InvalidBaseUrl(raw.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(IssuerError::InvalidBaseUrl(raw.to_string()));
    }
    Ok(url)
}

/// `<base>/accept-invite?token=<secret>&agencyId=<agency>`
///
/// Any path on the base is kept (`https://host/app` -> `https://host/app/accept-invite`),
/// any query or fragment on it is dropped.
pub fn invite_link(base: &Url, secret: &InviteSecret, agency_id: &str) -> Result<Url, IssuerError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);

    url.path_segments_mut()
        .map_err(|_| IssuerError::InvalidBaseUrl(base.to_string()))?
        .pop_if_empty()
        .push(ACCEPT_INVITE_PATH);

    url.query_pairs_mut()
        .append_pair("token", secret.expose())
        .append_pair("agencyId", agency_id);

    Ok(url)
}
