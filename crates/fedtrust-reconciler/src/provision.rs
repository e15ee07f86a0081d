use std::sync::Arc;

use chrono::{Months, Utc};
use fedtrust_domain::{
    AppId, CredentialStrategy, FederatedTrust, ProvisionPlan, SecretPolicy, SubscriptionId,
};
use fedtrust_driver::{
    same_role_definition, Application, AssignOutcome, Driver, DriverError, RoleDefinition,
    ServicePrincipal, Subscription,
};
use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::report::{Change, CredentialOutcome, ProvisionReport, ProvisionRequest, Verification};

/// Portal page where an administrator can grant the requested API permissions.
pub fn consent_url(client_id: &AppId) -> String {
    format!(
        "https://portal.azure.com/#view/Microsoft_AAD_RegisteredApps/ApplicationMenuBlade/~/CallAnAPI/appId/{}",
        client_id
    )
}

/// Identifiers discovered while the run progresses.
struct RunContext {
    subscription: Subscription,
    /// `/subscriptions/<id>`, the scope every role is granted on.
    scope: String,
    application: Option<Application>,
    service_principal: Option<ServicePrincipal>,
    /// Role definitions resolved by name in `ensure_roles`.
    role_definitions: Vec<RoleDefinition>,
}

/// Converge the directory toward `req.plan`.
///
/// Order: application → service principal → roles → Graph permissions →
/// credential. Existing objects are left as they are; only missing ones are
/// created. Role and permission failures become report warnings, any other
/// driver failure aborts the run.
pub async fn provision(
    req: ProvisionRequest,
    driver: Arc<dyn Driver>,
) -> Result<ProvisionReport, ProvisionError> {
    req.plan.validate()?;
    let mut report = ProvisionReport::new(req.dry_run, req.subscription_id.clone());

    // 1. Preconditions
    let mut ctx = preflight(&req.subscription_id, driver.as_ref()).await?;
    report.tenant_id = Some(ctx.subscription.tenant_id.clone());
    info!(
        subscription = %ctx.subscription.id,
        tenant = %ctx.subscription.tenant_id,
        dry_run = req.dry_run,
        credential = %req.plan.credential,
        "Starting provisioning"
    );

    // 2. Identity objects
    ensure_application(&req.plan, driver.as_ref(), &mut ctx, &mut report).await?;
    ensure_service_principal(driver.as_ref(), &mut ctx, &mut report).await?;

    // 3. Access
    ensure_roles(&req.plan, driver.as_ref(), &mut ctx, &mut report).await;
    ensure_graph_permissions(&req.plan, driver.as_ref(), &ctx, &mut report).await;

    // 4. Credential
    ensure_credential(&req.plan, driver.as_ref(), &ctx, &mut report).await?;

    // 5. Read-back. Never fails the run: a secret issued above must still reach the operator.
    if req.verify {
        report.verification = read_back(&req.plan, driver.as_ref(), &ctx, &mut report).await;
    }

    info!(
        changes = report.changes.len(),
        warnings = report.warnings.len(),
        "Provisioning finished"
    );
    Ok(report)
}

/// Inspect an existing setup without changing anything.
///
/// Fails with a precondition error when the application or its service
/// principal does not exist yet. Any `changes` in the report describe what a
/// `provision` run would still do.
pub async fn verify(
    subscription_id: SubscriptionId,
    plan: ProvisionPlan,
    driver: Arc<dyn Driver>,
) -> Result<ProvisionReport, ProvisionError> {
    plan.validate()?;
    let mut report = ProvisionReport::new(true, subscription_id.clone());
    let mut ctx = preflight(&subscription_id, driver.as_ref()).await?;
    report.tenant_id = Some(ctx.subscription.tenant_id.clone());

    ensure_application(&plan, driver.as_ref(), &mut ctx, &mut report).await?;
    if ctx.application.is_none() {
        return Err(ProvisionError::Precondition(format!(
            "application '{}' not found; run setup first",
            plan.app_display_name
        )));
    }
    ensure_service_principal(driver.as_ref(), &mut ctx, &mut report).await?;
    if ctx.service_principal.is_none() {
        return Err(ProvisionError::Precondition(format!(
            "application '{}' has no service principal; run setup first",
            plan.app_display_name
        )));
    }

    ensure_roles(&plan, driver.as_ref(), &mut ctx, &mut report).await;
    ensure_graph_permissions(&plan, driver.as_ref(), &ctx, &mut report).await;
    ensure_credential(&plan, driver.as_ref(), &ctx, &mut report).await?;
    report.verification = read_back(&plan, driver.as_ref(), &ctx, &mut report).await;
    Ok(report)
}

// ── Steps ─────────────────────────────────────────────────────────────────────

async fn preflight(
    subscription_id: &SubscriptionId,
    driver: &dyn Driver,
) -> Result<RunContext, ProvisionError> {
    driver
        .check_session()
        .await
        .map_err(|e| ProvisionError::Precondition(e.to_string()))?;

    let subscription = match driver.get_subscription(subscription_id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return Err(ProvisionError::Precondition(format!(
                "subscription {} not found or not visible to the signed-in account",
                subscription_id
            )))
        }
        Err(e) if e.is_session_error() || matches!(e, DriverError::Api { status: 403, .. }) => {
            return Err(ProvisionError::Precondition(e.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    if !subscription.is_usable() {
        return Err(ProvisionError::Precondition(format!(
            "subscription {} is in state '{}'",
            subscription_id, subscription.state
        )));
    }

    Ok(RunContext {
        scope: subscription.id.scope(),
        subscription,
        application: None,
        service_principal: None,
        role_definitions: Vec::new(),
    })
}

async fn ensure_application(
    plan: &ProvisionPlan,
    driver: &dyn Driver,
    ctx: &mut RunContext,
    report: &mut ProvisionReport,
) -> Result<(), ProvisionError> {
    let name = plan.app_display_name.as_str();
    match driver.find_application(name).await? {
        Some(app) => {
            info!(display_name = name, app_id = %app.app_id, "Application registration already exists");
            ctx.application = Some(app);
        }
        None if report.dry_run => {
            report.changes.push(Change::ApplicationCreated { display_name: name.to_string() });
        }
        None => {
            let app = driver.create_application(name).await?;
            report.changes.push(Change::ApplicationCreated { display_name: name.to_string() });
            ctx.application = Some(app);
        }
    }
    report.client_id = ctx.application.as_ref().map(|a| a.app_id.clone());
    Ok(())
}

async fn ensure_service_principal(
    driver: &dyn Driver,
    ctx: &mut RunContext,
    report: &mut ProvisionReport,
) -> Result<(), ProvisionError> {
    let Some(app) = &ctx.application else {
        report.changes.push(Change::ServicePrincipalCreated);
        return Ok(());
    };

    match driver.find_service_principal(&app.app_id).await? {
        Some(sp) => {
            debug!(object_id = %sp.object_id, "Service principal already exists");
            ctx.service_principal = Some(sp);
        }
        None if report.dry_run => report.changes.push(Change::ServicePrincipalCreated),
        None => {
            let sp = driver.create_service_principal(&app.app_id).await?;
            info!(object_id = %sp.object_id, "Service principal created");
            report.changes.push(Change::ServicePrincipalCreated);
            ctx.service_principal = Some(sp);
        }
    }
    report.service_principal_id = ctx.service_principal.as_ref().map(|sp| sp.object_id.clone());
    Ok(())
}

fn best_effort(report: &mut ProvisionReport, message: String) {
    warn!("{}", message);
    report.warnings.push(message);
}

async fn ensure_roles(
    plan: &ProvisionPlan,
    driver: &dyn Driver,
    ctx: &mut RunContext,
    report: &mut ProvisionReport,
) {
    let Some(sp) = &ctx.service_principal else {
        for role in &plan.roles {
            report.changes.push(Change::RoleAssigned { role: role.clone() });
        }
        return;
    };

    let existing = match driver.list_role_assignments(&ctx.scope, &sp.object_id).await {
        Ok(a) => a,
        Err(e) => {
            // Creation still works without the listing; 409 covers duplicates.
            debug!(error = %e, "Could not list existing role assignments");
            Vec::new()
        }
    };

    for role in &plan.roles {
        let definition = match driver.find_role_definition(&ctx.scope, role).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                best_effort(report, format!("role '{}' not found at {}; assign it manually", role, ctx.scope));
                continue;
            }
            Err(e) => {
                best_effort(report, format!("could not resolve role '{}': {}", role, e));
                continue;
            }
        };
        ctx.role_definitions.push(definition.clone());

        if existing.iter().any(|a| same_role_definition(&a.role_definition_id, &definition.id)) {
            debug!(role = %role, "Role already assigned");
            continue;
        }
        if report.dry_run {
            report.changes.push(Change::RoleAssigned { role: role.clone() });
            continue;
        }

        match driver.create_role_assignment(&ctx.scope, &definition, &sp.object_id).await {
            Ok(AssignOutcome::Created) => {
                info!(role = %role, scope = %ctx.scope, "Role assigned");
                report.changes.push(Change::RoleAssigned { role: role.clone() });
            }
            Ok(AssignOutcome::AlreadyExists) => debug!(role = %role, "Role already assigned"),
            Err(e) => best_effort(
                report,
                format!("could not assign role '{}' on {}: {}; assign it manually", role, ctx.scope, e),
            ),
        }
    }
}

async fn ensure_graph_permissions(
    plan: &ProvisionPlan,
    driver: &dyn Driver,
    ctx: &RunContext,
    report: &mut ProvisionReport,
) {
    if plan.graph_permissions.is_empty() {
        return;
    }
    let Some(app) = &ctx.application else {
        for permission in &plan.graph_permissions {
            report.changes.push(Change::PermissionRequested { permission: permission.clone() });
            report.changes.push(Change::ConsentGranted { permission: permission.clone() });
        }
        return;
    };

    let mut needs_manual_consent = false;

    let requested = match driver.requested_permissions(app).await {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "Could not read requested permissions");
            Vec::new()
        }
    };
    let granted = match &ctx.service_principal {
        Some(sp) => match driver.granted_permissions(sp).await {
            Ok(g) => g,
            Err(e) => {
                debug!(error = %e, "Could not read granted permissions");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    for value in &plan.graph_permissions {
        let permission = match driver.find_graph_permission(value).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                best_effort(report, format!("Microsoft Graph has no application permission '{}'", value));
                needs_manual_consent = true;
                continue;
            }
            Err(e) => {
                best_effort(report, format!("could not resolve Graph permission '{}': {}", value, e));
                needs_manual_consent = true;
                continue;
            }
        };

        if !requested.contains(&permission.id) {
            if report.dry_run {
                report.changes.push(Change::PermissionRequested { permission: value.clone() });
            } else {
                match driver.request_permission(app, &permission).await {
                    Ok(()) => {
                        info!(permission = %value, "Graph permission requested");
                        report.changes.push(Change::PermissionRequested { permission: value.clone() });
                    }
                    Err(e) => {
                        best_effort(report, format!("could not request Graph permission '{}': {}", value, e));
                        needs_manual_consent = true;
                    }
                }
            }
        }

        if granted.contains(&permission.id) {
            continue;
        }
        match &ctx.service_principal {
            Some(sp) if !report.dry_run => match driver.grant_admin_consent(sp, &permission).await {
                Ok(()) => {
                    info!(permission = %value, "Admin consent granted");
                    report.changes.push(Change::ConsentGranted { permission: value.clone() });
                }
                Err(e) => {
                    best_effort(report, format!("could not grant admin consent for '{}': {}", value, e));
                    needs_manual_consent = true;
                }
            },
            _ => report.changes.push(Change::ConsentGranted { permission: value.clone() }),
        }
    }

    if needs_manual_consent {
        report.consent_url = Some(consent_url(&app.app_id));
    }
}

async fn ensure_credential(
    plan: &ProvisionPlan,
    driver: &dyn Driver,
    ctx: &RunContext,
    report: &mut ProvisionReport,
) -> Result<(), ProvisionError> {
    match &plan.credential {
        CredentialStrategy::Federated(trust) => ensure_federated(trust, driver, ctx, report).await,
        CredentialStrategy::Secret(policy) => ensure_secret(policy, driver, ctx, report).await,
    }
}

async fn ensure_federated(
    trust: &FederatedTrust,
    driver: &dyn Driver,
    ctx: &RunContext,
    report: &mut ProvisionReport,
) -> Result<(), ProvisionError> {
    let existing = match &ctx.application {
        Some(app) => driver.list_federated_credentials(app).await?,
        None => Vec::new(),
    };

    if let Some(found) = existing.iter().find(|f| f.name == trust.name) {
        if found.issuer != trust.issuer || found.subject != trust.subject {
            best_effort(
                report,
                format!(
                    "federated credential '{}' exists with issuer '{}' and subject '{}'; left unchanged",
                    found.name, found.issuer, found.subject
                ),
            );
        }
        report.credential = Some(CredentialOutcome::Federated { trust: found.clone(), created: false });
        return Ok(());
    }

    if let (Some(app), false) = (&ctx.application, report.dry_run) {
        driver.create_federated_credential(app, trust).await?;
        info!(name = %trust.name, subject = %trust.subject, "Federated credential created");
    }
    report.changes.push(Change::FederatedCredentialCreated { name: trust.name.clone() });
    report.credential = Some(CredentialOutcome::Federated {
        trust: trust.clone(),
        created: !report.dry_run,
    });
    Ok(())
}

async fn ensure_secret(
    policy: &SecretPolicy,
    driver: &dyn Driver,
    ctx: &RunContext,
    report: &mut ProvisionReport,
) -> Result<(), ProvisionError> {
    let Some(app) = &ctx.application else {
        report.changes.push(Change::SecretIssued { display_name: policy.display_name.clone() });
        return Ok(());
    };

    let secrets = driver.list_secrets(app).await?;
    if let Some(existing) = secrets
        .iter()
        .find(|s| s.display_name.as_deref() == Some(policy.display_name.as_str()))
    {
        warn!(
            display_name = %policy.display_name,
            "A client secret with this name already exists and cannot be read back"
        );
        report.credential = Some(CredentialOutcome::SecretNotRetrievable {
            display_name: policy.display_name.clone(),
            expires_at: existing.expires_at,
        });
        return Ok(());
    }

    report.changes.push(Change::SecretIssued { display_name: policy.display_name.clone() });
    if report.dry_run {
        return Ok(());
    }

    let expires_at = Utc::now()
        .checked_add_months(Months::new(policy.validity_years.saturating_mul(12)))
        .ok_or_else(|| {
            ProvisionError::Internal(format!("secret validity of {} years overflows", policy.validity_years))
        })?;
    let issued = driver.add_secret(app, &policy.display_name, expires_at).await?;
    info!(display_name = %policy.display_name, expires_at = %issued.expires_at, "Client secret issued");
    report.credential = Some(CredentialOutcome::SecretIssued {
        display_name: policy.display_name.clone(),
        key_id: issued.key_id,
        value: issued.value,
        expires_at: issued.expires_at,
    });
    Ok(())
}

/// Re-read what the directory now holds. `None` when the service principal
/// does not exist (a dry run against an empty tenant).
///
/// Read failures become warnings and leave the matching field empty.
async fn read_back(
    plan: &ProvisionPlan,
    driver: &dyn Driver,
    ctx: &RunContext,
    report: &mut ProvisionReport,
) -> Option<Verification> {
    let (Some(app), Some(sp)) = (&ctx.application, &ctx.service_principal) else {
        return None;
    };
    let mut verification = Verification::default();

    match driver.list_role_assignments(&ctx.scope, &sp.object_id).await {
        Ok(assignments) => {
            for role in &plan.roles {
                let definition = ctx.role_definitions.iter().find(|d| &d.name == role);
                let assigned = assignments.iter().any(|a| match definition {
                    Some(d) => same_role_definition(&a.role_definition_id, &d.id),
                    None => a.role_name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(role)),
                });
                if !assigned {
                    best_effort(report, format!("role '{}' is not assigned at {}", role, ctx.scope));
                }
            }
            verification.roles = assignments
                .iter()
                .map(|a| {
                    a.role_name.clone().unwrap_or_else(|| {
                        ctx.role_definitions
                            .iter()
                            .find(|d| same_role_definition(&a.role_definition_id, &d.id))
                            .map(|d| d.name.clone())
                            .unwrap_or_else(|| a.role_definition_id.clone())
                    })
                })
                .collect();
        }
        Err(e) => best_effort(report, format!("could not read back role assignments: {}", e)),
    }

    if !plan.graph_permissions.is_empty() {
        match driver.granted_permissions(sp).await {
            Ok(granted_ids) => {
                for value in &plan.graph_permissions {
                    match driver.find_graph_permission(value).await {
                        Ok(Some(p)) if granted_ids.contains(&p.id) => {
                            verification.granted_permissions.push(value.clone())
                        }
                        Ok(_) => best_effort(report, format!("Graph permission '{}' has no admin consent", value)),
                        Err(e) => best_effort(
                            report,
                            format!("could not resolve Graph permission '{}': {}", value, e),
                        ),
                    }
                }
            }
            Err(e) => best_effort(report, format!("could not read back granted permissions: {}", e)),
        }
    }

    match driver.list_federated_credentials(app).await {
        Ok(creds) => verification.federated_credentials = creds,
        Err(e) => best_effort(report, format!("could not read back federated credentials: {}", e)),
    }
    match driver.list_secrets(app).await {
        Ok(secrets) => verification.secrets = secrets,
        Err(e) => best_effort(report, format!("could not read back client secrets: {}", e)),
    }

    Some(verification)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
