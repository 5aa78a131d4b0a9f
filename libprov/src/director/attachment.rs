//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::metadata::InstallableUnit;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Fragment to the hosts it attaches to.
pub type FragmentAssociation = BTreeMap<Arc<InstallableUnit>, Vec<Arc<InstallableUnit>>>;

/// Pairs every fragment in `units` with the hosts in `units` it attaches to.
pub fn associate_fragments<'a, I>(units: I) -> FragmentAssociation
where
    I: IntoIterator<Item = &'a Arc<InstallableUnit>> + Clone,
{
    let mut association = FragmentAssociation::new();
    for fragment in units.clone().into_iter().filter(|u| u.is_fragment()) {
        let hosts: Vec<Arc<InstallableUnit>> = units
            .clone()
            .into_iter()
            .filter(|host| !host.is_fragment() && host.is_host_for(fragment))
            .cloned()
            .collect();
        if !hosts.is_empty() {
            association.insert(fragment.clone(), hosts);
        }
    }
    association
}

/// Resolved copies of `units` carrying the fragments `association` assigns to them.
/// Previously attached fragments are dropped.
pub fn attach_fragments<'a, I>(units: I, association: &FragmentAssociation) -> BTreeSet<Arc<InstallableUnit>>
where
    I: IntoIterator<Item = &'a Arc<InstallableUnit>>,
{
    let mut by_host: BTreeMap<&InstallableUnit, Vec<Arc<InstallableUnit>>> = BTreeMap::new();
    for (fragment, hosts) in association {
        for host in hosts {
            by_host
                .entry(host.as_ref())
                .or_default()
                .push(fragment.clone());
        }
    }
    units
        .into_iter()
        .map(|unit| match by_host.get(unit.as_ref()) {
            Some(fragments) => unit.with_fragments(fragments.clone()),
            None if unit.attached_fragments().is_empty() => unit.clone(),
            None => unit.with_fragments(Vec::new()),
        })
        .collect()
}
