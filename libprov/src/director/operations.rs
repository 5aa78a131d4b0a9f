//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::director::Operand;
use crate::metadata::InstallableUnit;
use crate::profile::Profile;
use crate::request::ChangeRequest;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Unit operands turning `from` into `to`.
///
/// Uninstalls come first, then updates, then installs, each in `(id, version)` order.
/// Versions of the same id are paired into updates lowest to lowest; a unit whose update
/// descriptor names a removed unit of another id updates that unit. A unit kept with a
/// different set of attached fragments is updated onto itself.
pub fn generate_operands(
    from: &BTreeSet<Arc<InstallableUnit>>,
    to: &BTreeSet<Arc<InstallableUnit>>,
) -> Vec<Operand> {
    let mut updates: Vec<(Arc<InstallableUnit>, Arc<InstallableUnit>)> = Vec::new();
    let mut removed: BTreeMap<&str, Vec<Arc<InstallableUnit>>> = BTreeMap::new();
    let mut added: BTreeMap<&str, Vec<Arc<InstallableUnit>>> = BTreeMap::new();

    for old in from {
        match to.get(old.as_ref()) {
            Some(new) if !new.same_attachment(old) => updates.push((old.clone(), new.clone())),
            Some(_) => {}
            None => removed.entry(old.id()).or_default().push(old.clone()),
        }
    }
    for new in to {
        if !from.contains(new.as_ref()) {
            added.entry(new.id()).or_default().push(new.clone());
        }
    }

    let mut uninstalls = Vec::new();
    let mut installs = Vec::new();
    for (id, olds) in removed.iter_mut() {
        if let Some(news) = added.get_mut(id) {
            let pairs = olds.len().min(news.len());
            for (old, new) in olds.drain(..pairs).zip(news.drain(..pairs)) {
                updates.push((old, new));
            }
        }
    }

    // Renames declared through update descriptors.
    let leftover_added: Vec<Arc<InstallableUnit>> = added.values().flatten().cloned().collect();
    for new in leftover_added {
        let Some(descriptor) = new.update_descriptor() else {
            continue;
        };
        if descriptor.id == new.id() {
            continue;
        }
        let Some(olds) = removed.get_mut(descriptor.id.as_str()) else {
            continue;
        };
        if let Some(pos) = olds.iter().position(|old| descriptor.is_update_of(old)) {
            let old = olds.remove(pos);
            if let Some(news) = added.get_mut(new.id()) {
                news.retain(|n| n != &new);
            }
            updates.push((old, new));
        }
    }

    uninstalls.extend(removed.into_values().flatten());
    installs.extend(added.into_values().flatten());
    uninstalls.sort();
    installs.sort();
    updates.sort();

    uninstalls
        .into_iter()
        .map(Operand::Uninstall)
        .chain(
            updates
                .into_iter()
                .map(|(from, to)| Operand::Update { from, to }),
        )
        .chain(installs.into_iter().map(Operand::Install))
        .collect()
}

/// Property operands mirroring the request's property deltas. Removals of properties the
/// profile does not hold are dropped, as are unit property changes on units outside `to`.
pub fn property_operands(
    request: &ChangeRequest,
    to: &BTreeSet<Arc<InstallableUnit>>,
) -> Vec<Operand> {
    let profile: &Profile = request.profile();
    let mut operands = Vec::new();

    for key in request.property_removes() {
        if let Some(old) = profile.property(key) {
            operands.push(Operand::ProfileProperty {
                key: key.clone(),
                from: Some(old.to_string()),
                to: None,
            });
        }
    }
    for (key, value) in request.property_adds() {
        let old = profile.property(key).map(str::to_string);
        if old.as_deref() != Some(value.as_str()) {
            operands.push(Operand::ProfileProperty {
                key: key.clone(),
                from: old,
                to: Some(value.clone()),
            });
        }
    }

    for (unit, keys) in request.unit_property_removes() {
        for key in keys {
            if let Some(old) = profile.unit_property(unit, key) {
                operands.push(Operand::UnitProperty {
                    unit: unit.clone(),
                    key: key.clone(),
                    from: Some(old.to_string()),
                    to: None,
                });
            }
        }
    }
    for (unit, props) in request.unit_property_adds() {
        let Some(target) = to.get(unit.as_ref()) else {
            continue;
        };
        for (key, value) in props {
            let old = profile.unit_property(unit, key).map(str::to_string);
            if old.as_deref() != Some(value.as_str()) {
                operands.push(Operand::UnitProperty {
                    unit: target.clone(),
                    key: key.clone(),
                    from: old,
                    to: Some(value.clone()),
                });
            }
        }
    }
    operands
}
