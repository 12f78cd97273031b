use super::{CommandResult, Session, with_session};
use crate::output;
use crate::proxy::SiteBlock;

pub fn run(domain: &str) -> CommandResult {
    with_session(|session| {
        output::step(&format!("Issuing a certificate for {domain}..."));
        secure_domain(session, domain)?;
        output::success(&format!("https://{domain} is served with a fresh certificate"));
        Ok(())
    })
}

pub fn secure_domain(session: &Session<'_>, domain: &str) -> CommandResult<SiteBlock> {
    Ok(session.proxy().secure(domain)?)
}
