use std::collections::HashSet;
use std::path::PathBuf;

use log::Log;
use rusqlite::{params, Connection, OptionalExtension};

use super::{required_script, DbUpgrade, StepLogger};
use crate::db::{drop_keys_if_exist, ScriptLocator};
use crate::error::UpgradeError;
use crate::hypervisor::{HypervisorType, SystemVmTemplate};

const PREPARE_SCRIPT: &str = "db/schema-442to450.sql";
const CLEANUP_SCRIPT: &str = "db/schema-442to450-cleanup.sql";

const SYSTEM_OFFERING_RAM_MB: i64 = 256;

/// Upgrade: 4.4.2 → 4.5.0
///
/// Data migration:
///   - Points system VMs and the `router.template.*` settings at the 4.5
///     system VM template of each hypervisor. A hypervisor with no clusters
///     may lack the template; its newest SYSTEM template gets the 4.5 download
///     URL and checksum instead.
///   - Drops the stale `id_2` unique key from `storage_pool` and the duplicated
///     `fk_async_job_join_map__join_job_id` foreign key.
///   - Sets the built-in router and internal load balancer offerings to 256 MB.
pub struct Upgrade442to450;

impl DbUpgrade for Upgrade442to450 {
    fn upgradable_version_range(&self) -> [&'static str; 2] {
        ["4.4.2", "4.5.0"]
    }

    fn upgraded_version(&self) -> &'static str {
        "4.5.0"
    }

    fn supports_rolling_upgrade(&self) -> bool {
        false
    }

    fn prepare_scripts(&self, locator: &dyn ScriptLocator) -> Result<Vec<PathBuf>, UpgradeError> {
        Ok(vec![required_script(locator, PREPARE_SCRIPT)?])
    }

    fn perform_data_migration(&self, conn: &Connection, logger: &dyn Log) -> Result<(), UpgradeError> {
        let log = StepLogger::new(logger, module_path!());

        let updates = update_system_vm_templates(conn, log)?;
        drop_invalid_key_from_storage_pool(conn, log)?;
        drop_duplicated_foreign_key_from_async_job(conn, log)?;

        let mut offerings_resized = 0;
        for offering in [SystemOffering::DomainRouter, SystemOffering::InternalLoadBalancerVm] {
            if upgrade_system_offering_ram(conn, log, offering)?.is_some() {
                offerings_resized += 1;
            }
        }

        let advanced = updates
            .iter()
            .filter(|(_, update)| matches!(update, TemplateUpdate::Advanced { .. }))
            .count();
        log.debug(format_args!(
            "Data migration complete: {} of {} hypervisor(s) moved to 4.5.0 templates, {} system offering(s) resized",
            advanced,
            updates.len(),
            offerings_resized
        ));

        Ok(())
    }

    fn cleanup_scripts(&self, locator: &dyn ScriptLocator) -> Result<Vec<PathBuf>, UpgradeError> {
        Ok(vec![required_script(locator, CLEANUP_SCRIPT)?])
    }
}

/// What happened to one hypervisor's system VM template.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TemplateUpdate {
    /// The 4.5 template exists and system VMs now use it.
    Advanced { template_id: i64, vms_updated: usize },
    /// No 4.5 template and the hypervisor is unused; the newest SYSTEM
    /// template was given the 4.5 download location.
    PlaceholderRefreshed { rows_updated: usize },
}

fn update_system_vm_templates(
    conn: &Connection,
    log: StepLogger<'_>,
) -> Result<Vec<(HypervisorType, TemplateUpdate)>, UpgradeError> {
    log.debug(format_args!("Updating System Vm template IDs"));

    let in_use = hypervisors_in_use(conn)?;
    let mut updates = Vec::with_capacity(HypervisorType::SYSTEM_VM_HYPERVISORS.len());

    for hypervisor in HypervisorType::SYSTEM_VM_HYPERVISORS {
        let Some(template) = hypervisor.system_vm_template() else {
            continue;
        };

        log.debug(format_args!("Updating {} System Vms", hypervisor));
        let update =
            update_hypervisor_template(conn, log, hypervisor, template, in_use.contains(&hypervisor))?;

        match &update {
            TemplateUpdate::Advanced {
                template_id,
                vms_updated,
            } => log.debug(format_args!(
                "{} system Vms now use template {} (id {}), {} Vm(s) updated",
                hypervisor, template.name, template_id, vms_updated
            )),
            TemplateUpdate::PlaceholderRefreshed { rows_updated } => log.debug(format_args!(
                "Set 4.5.0 download location on {} {} SYSTEM template(s)",
                rows_updated, hypervisor
            )),
        }

        updates.push((hypervisor, update));
    }

    log.debug(format_args!("Updating System Vm Template IDs Complete"));
    Ok(updates)
}

/// Hypervisor families with at least one live cluster. Types without a
/// system VM template are not tracked.
fn hypervisors_in_use(conn: &Connection) -> Result<HashSet<HypervisorType>, UpgradeError> {
    let raw_types = cluster_hypervisor_types(conn)
        .map_err(UpgradeError::sql("Error while listing hypervisors in use"))?;

    Ok(raw_types
        .iter()
        .map(|raw| HypervisorType::from_db_value(raw.as_deref()))
        .filter(|hypervisor| hypervisor.system_vm_template().is_some())
        .collect())
}

fn cluster_hypervisor_types(conn: &Connection) -> rusqlite::Result<Vec<Option<String>>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT hypervisor_type FROM cluster WHERE removed IS NULL")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

fn update_hypervisor_template(
    conn: &Connection,
    log: StepLogger<'_>,
    hypervisor: HypervisorType,
    template: &SystemVmTemplate,
    in_use: bool,
) -> Result<TemplateUpdate, UpgradeError> {
    let context = format!("Error while updating {hypervisor} systemVm template");

    let template_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM vm_template WHERE name = ?1 AND removed IS NULL ORDER BY id DESC LIMIT 1",
            [template.name],
            |row| row.get(0),
        )
        .optional()
        .map_err(UpgradeError::sql(context.clone()))?;

    match template_id {
        Some(template_id) => {
            let vms_updated = advance_system_vms(conn, hypervisor, template, template_id)
                .map_err(UpgradeError::sql(context))?;
            Ok(TemplateUpdate::Advanced {
                template_id,
                vms_updated,
            })
        }
        None if in_use => Err(UpgradeError::MissingRequiredTemplate { hypervisor }),
        None => {
            log.warn(format_args!(
                "4.5.0 {} SystemVm template not found. {} hypervisor is not used, so not failing upgrade",
                hypervisor, hypervisor
            ));
            let rows_updated = refresh_latest_system_template(conn, hypervisor, template)
                .map_err(UpgradeError::sql(context))?;
            Ok(TemplateUpdate::PlaceholderRefreshed { rows_updated })
        }
    }
}

fn advance_system_vms(
    conn: &Connection,
    hypervisor: HypervisorType,
    template: &SystemVmTemplate,
    template_id: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE vm_template SET type = 'SYSTEM' WHERE id = ?1",
        [template_id],
    )?;

    let vms_updated = conn.execute(
        "UPDATE vm_instance SET vm_template_id = ?1 WHERE type <> 'User' AND hypervisor_type = ?2",
        params![template_id, hypervisor.as_ref()],
    )?;

    conn.execute(
        "UPDATE configuration SET value = ?1 WHERE name = ?2",
        params![template.name, template.router_config_key],
    )?;

    Ok(vms_updated)
}

fn refresh_latest_system_template(
    conn: &Connection,
    hypervisor: HypervisorType,
    template: &SystemVmTemplate,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE vm_template SET url = ?1, checksum = ?2
         WHERE id = (
             SELECT id FROM vm_template
             WHERE hypervisor_type = ?3 AND type = 'SYSTEM' AND removed IS NULL
             ORDER BY id DESC LIMIT 1
         )",
        params![template.url, template.checksum, hypervisor.as_ref()],
    )
}

fn drop_invalid_key_from_storage_pool(
    conn: &Connection,
    log: StepLogger<'_>,
) -> Result<(), UpgradeError> {
    log.debug(format_args!("Dropping id_2 key from storage_pool table"));
    drop_keys_if_exist(conn, "storage_pool", &["id_2"], false)
}

fn drop_duplicated_foreign_key_from_async_job(
    conn: &Connection,
    log: StepLogger<'_>,
) -> Result<(), UpgradeError> {
    log.debug(format_args!(
        "Dropping fk_async_job_join_map__join_job_id key from async_job_join_map table"
    ));
    drop_keys_if_exist(
        conn,
        "async_job_join_map",
        &["fk_async_job_join_map__join_job_id"],
        true,
    )
}

/// Service offerings the management server creates for its own appliances.
/// The lowest id of each `vm_type` is the built-in one; later rows belong to
/// users and are never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemOffering {
    DomainRouter,
    InternalLoadBalancerVm,
}

impl SystemOffering {
    pub fn vm_type(&self) -> &'static str {
        match self {
            SystemOffering::DomainRouter => "domainrouter",
            SystemOffering::InternalLoadBalancerVm => "internalloadbalancervm",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SystemOffering::DomainRouter => "domain router",
            SystemOffering::InternalLoadBalancerVm => "internal loadbalancer vm",
        }
    }
}

/// Returns the id of the offering that was resized, if there was one.
fn upgrade_system_offering_ram(
    conn: &Connection,
    log: StepLogger<'_>,
    offering: SystemOffering,
) -> Result<Option<i64>, UpgradeError> {
    let to_err = || {
        UpgradeError::sql(format!(
            "Unable to upgrade ram_size of service offering for {}.",
            offering.description()
        ))
    };

    let offering_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM service_offering WHERE vm_type = ?1 ORDER BY id ASC LIMIT 1",
            [offering.vm_type()],
            |row| row.get(0),
        )
        .optional()
        .map_err(to_err())?;

    let Some(offering_id) = offering_id else {
        log.debug(format_args!(
            "No service offering for {} found, RAM left unchanged",
            offering.description()
        ));
        return Ok(None);
    };

    conn.execute(
        "UPDATE service_offering SET ram_size = ?1 WHERE id = ?2",
        params![SYSTEM_OFFERING_RAM_MB, offering_id],
    )
    .map_err(to_err())?;

    log.debug(format_args!(
        "Done upgrading RAM for service offering of {} to {}",
        offering.description(),
        SYSTEM_OFFERING_RAM_MB
    ));

    Ok(Some(offering_id))
}
