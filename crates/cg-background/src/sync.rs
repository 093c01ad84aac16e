//! Declarative rule synchronizer

use std::cell::RefCell;

use cg_compiler::{build_update, RuleIdAllocator};
use cg_core::whitelist::Whitelist;

use crate::error::HostError;
use crate::host::DynamicRulesHost;

/// Replace every installed dynamic rule with one allow-rule per whitelisted
/// domain, in a single update. Returns the number of rules installed.
///
/// Ids continue from the session counter, so repeated syncs produce fresh ids
/// but identical conditions.
pub async fn resync<H>(
    host: &H,
    whitelist: &RefCell<Whitelist>,
    ids: &RefCell<RuleIdAllocator>,
) -> Result<usize, HostError>
where
    H: DynamicRulesHost + ?Sized,
{
    let installed = host.get_dynamic_rules().await?;

    let update = build_update(
        installed.iter().map(|rule| rule.id),
        &whitelist.borrow(),
        &mut ids.borrow_mut(),
    );
    let count = update.add_rules.len();
    log::debug!(
        "dynamic rules: removing {}, adding {}",
        update.remove_rule_ids.len(),
        count
    );

    host.update_dynamic_rules(update).await?;
    Ok(count)
}
