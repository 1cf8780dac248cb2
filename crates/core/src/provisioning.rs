//! Privileged bootstrap of new tenants.
//!
//! These procedures write outside any tenant scope: a brand-new owner has no
//! organization yet, so the gateway cannot be used. The organization, its owner
//! membership and the initial settings land in one atomic batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use crate::capability::CapabilityMap;
use crate::domain::member::{Availability, Member, MemberId, MemberRole};
use crate::domain::organization::{OrgId, Organization, PlanTier};
use crate::domain::settings::Settings;
use crate::errors::ApplicationError;
use crate::gateway::{timestamp, Collection};
use crate::store::{decode_document, encode_document, Document, Filter, RecordStore, StoreError};
use crate::tenant::Session;

pub const REFERRALS_COLLECTION: &str = "referrals";
const REFERRAL_CODE_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSignup {
    pub organization_name: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedTenant {
    pub organization: Organization,
    pub owner: Member,
    pub settings: Settings,
    #[serde(default)]
    pub referral: Option<ReferralLink>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralLink {
    pub id: String,
    pub code: String,
    pub referrer_org_id: OrgId,
    pub referred_org_id: OrgId,
    pub created_at: DateTime<Utc>,
}

impl ReferralLink {
    /// One referral per referred organization.
    pub fn id_for(referred: &OrgId) -> String {
        format!("ref_{}", referred.as_str())
    }
}

#[derive(Clone)]
pub struct TenantProvisioner {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    default_plan: PlanTier,
    serial_prefix: String,
}

impl TenantProvisioner {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            audit: Arc::new(TracingAuditSink),
            default_plan: PlanTier::Free,
            serial_prefix: Settings::default().quote_serial_prefix,
        }
    }

    pub fn with_defaults(mut self, plan: PlanTier, serial_prefix: impl Into<String>) -> Self {
        self.default_plan = plan;
        self.serial_prefix = serial_prefix.into();
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Creates an organization owned by the session's identity, together with the owner
    /// membership and default settings. Either everything is written or nothing is.
    pub async fn provision_owner(
        &self,
        session: &Session,
        signup: OwnerSignup,
    ) -> Result<ProvisionedTenant, ApplicationError> {
        let name = signup.organization_name.trim();
        if name.is_empty() {
            return Err(ApplicationError::ValidationFailed(
                "organization name is required".to_owned(),
            ));
        }
        let existing = self
            .store
            .find_one(Collection::Members.as_str(), &Filter::new().eq("user_id", session.user_id.0.as_str()))
            .await?;
        if existing.is_some() {
            return Err(ApplicationError::Conflict {
                collection: Collection::Members.as_str().to_owned(),
                id: session.user_id.0.clone(),
            });
        }

        let referrer = match signup.referral_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(self.referrer_for(code).await?),
            _ => None,
        };

        let now = Utc::now();
        let org_id = OrgId(Uuid::new_v4().to_string());
        let organization = Organization {
            id: org_id.clone(),
            name: name.to_owned(),
            owner_user_id: session.user_id.clone(),
            plan: self.default_plan,
            monthly_lead_quota: self.default_plan.default_lead_quota(),
            max_users: self.default_plan.default_max_users(),
            active: true,
            subscription_ends_on: None,
            auto_renew: false,
            renewal_interval: None,
            referral_code: Some(referral_code()),
            referred_by: referrer.as_ref().map(|(org, _)| org.clone()),
            created_at: now,
            updated_at: now,
        };
        let owner = Member {
            id: MemberId(Uuid::new_v4().to_string()),
            org_id: org_id.clone(),
            user_id: session.user_id.clone(),
            email: session.email.trim().to_ascii_lowercase(),
            full_name: session.full_name.clone(),
            role: MemberRole::Owner,
            capabilities: CapabilityMap::default(),
            availability: Availability::default(),
            created_at: now,
            updated_at: now,
        };
        let settings = Settings {
            quote_serial_prefix: self.serial_prefix.clone(),
            created_at: Some(now),
            updated_at: Some(now),
            ..Settings::for_org(&org_id)
        };
        let referral = referrer.map(|(referrer_org_id, code)| ReferralLink {
            id: ReferralLink::id_for(&org_id),
            code,
            referrer_org_id,
            referred_org_id: org_id.clone(),
            created_at: now,
        });

        let mut batch = vec![
            (Collection::Organizations.as_str().to_owned(), stamped(&organization, now)?),
            (Collection::Members.as_str().to_owned(), stamped(&owner, now)?),
            (Collection::Settings.as_str().to_owned(), stamped(&settings, now)?),
        ];
        if let Some(referral) = &referral {
            batch.push((REFERRALS_COLLECTION.to_owned(), stamped(referral, now)?));
        }
        self.store.insert_all(batch).await?;

        info!(
            event_name = "provisioning.owner_provisioned",
            org_id = %org_id,
            user_id = %session.user_id.0,
            plan = organization.plan.as_str(),
            referred = referral.is_some(),
            "tenant provisioned"
        );
        self.audit.emit(
            AuditContext::new(Some(org_id.clone()), Uuid::new_v4().to_string(), format!("user:{}", session.user_id.0))
                .event(Some(org_id.to_string()), "provisioning.owner_provisioned", AuditCategory::Provisioning, AuditOutcome::Success)
                .with_metadata("plan", organization.plan.as_str()),
        );

        Ok(ProvisionedTenant { organization, owner, settings, referral })
    }

    /// Links an existing organization to the tenant owning `code`. An organization can be
    /// referred once and never by itself.
    pub async fn link_referral(
        &self,
        org_id: &OrgId,
        code: &str,
    ) -> Result<ReferralLink, ApplicationError> {
        let organization = self.organization(org_id).await?;
        if organization.referred_by.is_some() {
            return Err(ApplicationError::Conflict {
                collection: REFERRALS_COLLECTION.to_owned(),
                id: ReferralLink::id_for(org_id),
            });
        }
        let (referrer_org_id, code) = self.referrer_for(code).await?;
        if &referrer_org_id == org_id {
            return Err(ApplicationError::ValidationFailed(
                "an organization cannot refer itself".to_owned(),
            ));
        }

        let now = Utc::now();
        let link = ReferralLink {
            id: ReferralLink::id_for(org_id),
            code,
            referrer_org_id: referrer_org_id.clone(),
            referred_org_id: org_id.clone(),
            created_at: now,
        };
        self.store.insert(REFERRALS_COLLECTION, stamped(&link, now)?).await?;

        let mut fields = Document::new();
        fields.insert("referred_by".to_owned(), Value::String(referrer_org_id.0.clone()));
        fields.insert("updated_at".to_owned(), timestamp(now));
        self.store
            .update_where(Collection::Organizations.as_str(), &Filter::new().eq("id", org_id.as_str()), fields)
            .await?;

        info!(
            event_name = "provisioning.referral_linked",
            org_id = %org_id,
            referrer_org_id = %referrer_org_id,
            "referral linked"
        );
        self.audit.emit(
            AuditContext::new(Some(org_id.clone()), Uuid::new_v4().to_string(), "system:provisioning")
                .event(Some(link.id.clone()), "provisioning.referral_linked", AuditCategory::Provisioning, AuditOutcome::Success)
                .with_metadata("referrer_org_id", referrer_org_id.0.clone()),
        );
        Ok(link)
    }

    async fn organization(&self, org_id: &OrgId) -> Result<Organization, ApplicationError> {
        let document = self
            .store
            .find_one(Collection::Organizations.as_str(), &Filter::new().eq("id", org_id.as_str()))
            .await?
            .ok_or_else(|| ApplicationError::NotFound {
                collection: Collection::Organizations.as_str().to_owned(),
                id: org_id.to_string(),
            })?;
        Ok(decode_document(document)?)
    }

    async fn referrer_for(&self, code: &str) -> Result<(OrgId, String), ApplicationError> {
        let code = code.trim().to_ascii_uppercase();
        let referrer = self
            .store
            .find_one(Collection::Organizations.as_str(), &Filter::new().eq("referral_code", code.as_str()))
            .await?
            .ok_or_else(|| ApplicationError::ValidationFailed(format!("unknown referral code `{code}`")))?;
        let referrer: Organization = decode_document(referrer)?;
        Ok((referrer.id, code))
    }
}

fn referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LEN)
        .map(|byte| char::from(byte).to_ascii_uppercase())
        .collect()
}

/// Encodes a record with the millisecond timestamps the gateway writes, so bootstrap
/// records sort alongside gateway-created ones.
fn stamped<T: Serialize>(record: &T, now: DateTime<Utc>) -> Result<Document, StoreError> {
    let mut document = encode_document(record)?;
    for field in ["created_at", "updated_at"] {
        if document.contains_key(field) {
            document.insert(field.to_owned(), timestamp(now));
        }
    }
    Ok(document)
}
