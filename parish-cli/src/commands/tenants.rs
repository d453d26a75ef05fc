//! `parish tenants` commands - Registry administration.
//!
//! These talk to the registry and the storage directory directly. Handles a
//! running server already pooled for a purged tenant are not closed; purge
//! while the server is stopped or after disabling the tenant.

use std::path::Path;

use parish_core::error::TenantError;
use parish_core::tenant::{Tenant, TenantId, TenantStatus};

use crate::cli::{TenantsArgs, TenantsSubcommand};
use crate::error::CliResult;
use crate::output::{self, kv, success, warn};

/// Run the tenants command
pub async fn run(config_path: Option<&Path>, args: TenantsArgs) -> CliResult<()> {
    let config = super::load_config(config_path)?;
    let service = super::open_provisioning(&config).await?;
    let registry = service.registry();

    match args.command {
        TenantsSubcommand::List { json } => {
            let tenants = registry.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tenants)?);
            } else {
                print_table(&tenants);
            }
        }
        TenantsSubcommand::Show { id, json } => {
            let id = TenantId::parse(id)?;
            let tenant = registry
                .get(&id)
                .await?
                .ok_or_else(|| TenantError::tenant_not_found(id.as_str()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tenant)?);
            } else {
                print_tenant(&tenant);
            }
        }
        TenantsSubcommand::Disable { id } => {
            let id = TenantId::parse(id)?;
            let tenant = registry.set_status(&id, TenantStatus::Disabled).await?;
            success(&format!("Tenant '{}' disabled", tenant.id));
        }
        TenantsSubcommand::Enable { id } => {
            let id = TenantId::parse(id)?;
            let tenant = registry.set_status(&id, TenantStatus::Active).await?;
            success(&format!("Tenant '{}' enabled", tenant.id));
        }
        TenantsSubcommand::Purge { id, yes } => {
            let id = TenantId::parse(id)?;
            if !yes {
                warn(&format!(
                    "This deletes tenant '{}' and every record in its store.",
                    id
                ));
                if !output::confirm("Continue?") {
                    output::info("Aborted");
                    return Ok(());
                }
            }
            let tenant = service.deprovision(&id).await?;
            success(&format!("Tenant '{}' purged", tenant.id));
        }
        TenantsSubcommand::SweepOrphans => {
            output::header("Orphan sweep");
            let report = service.sweep_orphans().await?;
            kv("Stores scanned", &report.scanned.to_string());
            kv("Stores removed", &report.removed.to_string());
            kv("Stores kept", &report.kept.to_string());
            kv("Stale reservations", &report.stale_reservations.to_string());
            output::newline();
            success("Sweep complete");
        }
    }
    Ok(())
}

fn print_table(tenants: &[Tenant]) {
    if tenants.is_empty() {
        output::info("No tenants registered");
        return;
    }
    let width = tenants
        .iter()
        .map(|t| t.id.as_str().len())
        .max()
        .unwrap_or(0)
        .max(2);
    output::section(&format!("{:<width$}  {:<12}  {}", "ID", "STATUS", "NAME"));
    for tenant in tenants {
        // Pad before coloring so the escape codes do not skew the columns.
        let status = output::style_status(
            tenant.status,
            &format!("{:<12}", tenant.status.as_str()),
        );
        println!("{:<width$}  {}  {}", tenant.id.as_str(), status, tenant.name);
    }
    output::newline();
    output::dim(&format!("{} tenant(s)", tenants.len()));
}

fn print_tenant(tenant: &Tenant) {
    output::header(&format!("Tenant {}", tenant.id));
    kv("Name", &tenant.name);
    kv(
        "Status",
        &output::style_status(tenant.status, tenant.status.as_str()),
    );
    kv("Admin email", tenant.admin_email.as_deref().unwrap_or("-"));
    kv(
        "Store",
        tenant.locator.as_ref().map(|l| l.as_str()).unwrap_or("-"),
    );
    kv("Created", &tenant.created_at.to_rfc3339());
    kv("Updated", &tenant.updated_at.to_rfc3339());
}
