use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::code::Code;

const MAX_TITLE_LEN: usize = 200;
const MAX_NAME_LEN: usize = 120;
const DEFAULT_CURRENCY: &str = "USD";

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Returns the canonical database representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }

            /// Parses the database representation.
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

string_enum! {
    /// Physical type of a listing.
    PropertyKind {
        House => "house",
        Apartment => "apartment",
        Land => "land",
        Commercial => "commercial",
        Office => "office",
    }
}

string_enum! {
    /// Whether the listing is offered for sale or for rent.
    Operation {
        Sale => "sale",
        Rent => "rent",
    }
}

string_enum! {
    PropertyStatus {
        Available => "available",
        Reserved => "reserved",
        Sold => "sold",
        Rented => "rented",
        Withdrawn => "withdrawn",
    }
}

impl Default for PropertyStatus {
    fn default() -> Self {
        Self::Available
    }
}

string_enum! {
    /// Channel through which a lead first reached the agency.
    LeadSource {
        Website => "website",
        Whatsapp => "whatsapp",
        Phone => "phone",
        Referral => "referral",
        WalkIn => "walk_in",
        Portal => "portal",
        Other => "other",
    }
}

string_enum! {
    /// Sales pipeline stage of a lead.
    LeadStatus {
        New => "new",
        Contacted => "contacted",
        Qualified => "qualified",
        Negotiating => "negotiating",
        Won => "won",
        Lost => "lost",
    }
}

impl LeadStatus {
    /// Closed leads no longer receive follow-ups.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

impl Default for LeadStatus {
    fn default() -> Self {
        Self::New
    }
}

/// Property listing persisted for the agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub code: Code,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: PropertyKind,
    pub operation: Operation,
    pub status: PropertyStatus,
    pub price: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_m2: Option<f64>,
    pub highlighted: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    /// Applies a validated patch. The code and identity fields are never touched.
    pub fn apply(
        &mut self,
        patch: PropertyPatch,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        patch.validate()?;
        if let Some(title) = patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = non_empty(description);
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(operation) = patch.operation {
            self.operation = operation;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(currency) = patch.currency {
            self.currency = currency;
        }
        if let Some(address) = patch.address {
            self.address = non_empty(address);
        }
        if let Some(city) = patch.city {
            self.city = non_empty(city);
        }
        if let Some(bedrooms) = patch.bedrooms {
            self.bedrooms = Some(bedrooms);
        }
        if let Some(bathrooms) = patch.bathrooms {
            self.bathrooms = Some(bathrooms);
        }
        if let Some(area) = patch.area_m2 {
            self.area_m2 = Some(area);
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Payload accepted when creating a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: PropertyKind,
    pub operation: Operation,
    #[serde(default)]
    pub status: PropertyStatus,
    pub price: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub area_m2: Option<f64>,
}

impl PropertyDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        validate_price(self.price)?;
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
        }
        if let Some(area) = self.area_m2 {
            validate_area(area)?;
        }
        Ok(())
    }

    /// Builds the record to persist once a code has been allocated.
    pub fn into_property(
        self,
        id: String,
        code: Code,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Property {
        Property {
            id,
            code,
            title: self.title.trim().to_string(),
            description: self.description.and_then(non_empty),
            kind: self.kind,
            operation: self.operation,
            status: self.status,
            price: self.price,
            currency: self
                .currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            address: self.address.and_then(non_empty),
            city: self.city.and_then(non_empty),
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            area_m2: self.area_m2,
            highlighted: false,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a property. Unknown fields such as `code` are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: Option<PropertyKind>,
    #[serde(default)]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub status: Option<PropertyStatus>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub area_m2: Option<f64>,
}

impl PropertyPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
        }
        if let Some(area) = self.area_m2 {
            validate_area(area)?;
        }
        Ok(())
    }
}

/// Sales lead tracked by the agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub code: Code,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub source: LeadSource,
    pub status: LeadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contacted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_on: Option<NaiveDate>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Applies a validated patch. Status changes do not reschedule on their own;
    /// callers decide whether to recompute `follow_up_on`.
    pub fn apply(&mut self, patch: LeadPatch, now: DateTime<Utc>) -> Result<(), ValidationError> {
        patch.validate()?;
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = patch.email {
            self.email = non_empty(email);
        }
        if let Some(phone) = patch.phone {
            self.phone = non_empty(phone);
        }
        if self.email.is_none() && self.phone.is_none() {
            return Err(ValidationError::MissingContact);
        }
        if let Some(source) = patch.source {
            self.source = source;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(property_id) = patch.property_id {
            self.property_id = non_empty(property_id);
        }
        if let Some(notes) = patch.notes {
            self.notes = non_empty(notes);
        }
        if let Some(follow_up_on) = patch.follow_up_on {
            self.follow_up_on = Some(follow_up_on);
        }
        if self.status.is_closed() {
            self.follow_up_on = None;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Payload accepted when creating a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadDraft {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub source: LeadSource,
    #[serde(default)]
    pub status: LeadStatus,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl LeadDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        let email = self.email.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let phone = self.phone.as_deref().map(str::trim).filter(|v| !v.is_empty());
        if email.is_none() && phone.is_none() {
            return Err(ValidationError::MissingContact);
        }
        if let Some(email) = email {
            validate_email(email)?;
        }
        if let Some(phone) = phone {
            validate_phone(phone)?;
        }
        Ok(())
    }

    /// Builds the record to persist once a code has been allocated.
    pub fn into_lead(
        self,
        id: String,
        code: Code,
        created_by: &str,
        follow_up_on: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Lead {
        Lead {
            id,
            code,
            name: self.name.trim().to_string(),
            email: self.email.and_then(non_empty),
            phone: self.phone.and_then(non_empty),
            source: self.source,
            status: self.status,
            property_id: self.property_id.and_then(non_empty),
            notes: self.notes.and_then(non_empty),
            last_contacted_at: None,
            follow_up_on,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a lead. Unknown fields such as `code` are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeadPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub source: Option<LeadSource>,
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub follow_up_on: Option<NaiveDate>,
}

impl LeadPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(email) = self.email.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            validate_email(email)?;
        }
        if let Some(phone) = self.phone.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            validate_phone(phone)?;
        }
        Ok(())
    }
}

/// Contact recorded against a lead, optionally moving it along the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Errors raised by payload validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("price must be a positive amount")]
    Price,
    #[error("currency must be a three-letter ISO code (got {0})")]
    Currency(String),
    #[error("area_m2 must be a positive number")]
    Area,
    #[error("a lead needs at least an email or a phone number")]
    MissingContact,
    #[error("invalid email address: {0}")]
    Email(String),
    #[error("invalid phone number: {0}")]
    Phone(String),
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    validate_text("title", title, MAX_TITLE_LEN)
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    validate_text("name", name, MAX_NAME_LEN)
}

fn validate_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

fn validate_price(price: i64) -> Result<(), ValidationError> {
    if price <= 0 {
        return Err(ValidationError::Price);
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ValidationError::Currency(currency.to_string()));
    }
    Ok(())
}

fn validate_area(area: f64) -> Result<(), ValidationError> {
    if !area.is_finite() || area <= 0.0 {
        return Err(ValidationError::Area);
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
        .unwrap_or(false);
    if !valid || email.contains(char::is_whitespace) {
        return Err(ValidationError::Email(email.to_string()));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));
    if !allowed || !(7..=15).contains(&digits) {
        return Err(ValidationError::Phone(phone.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Category;
    use serde_json::json;

    fn draft() -> PropertyDraft {
        serde_json::from_value(json!({
            "title": "  Casa en Coyoacán ",
            "kind": "house",
            "operation": "sale",
            "price": 4_500_000,
            "city": "CDMX",
            "address": "   "
        }))
        .expect("draft parses")
    }

    fn lead() -> Lead {
        let draft: LeadDraft = serde_json::from_value(json!({
            "name": "Ana López",
            "phone": "+52 55 1234 5678",
            "source": "whatsapp"
        }))
        .unwrap();
        draft.into_lead(
            "lead-1".into(),
            Code::format(Category::Lead, 12, 5),
            "user-1",
            None,
            Utc::now(),
        )
    }

    #[test]
    fn property_draft_fills_defaults() {
        let draft = draft();
        draft.validate().expect("valid draft");
        let now = Utc::now();
        let property = draft.into_property(
            "prop-1".into(),
            Code::format(Category::Property, 4821, 5),
            "user-1",
            now,
        );

        assert_eq!(property.title, "Casa en Coyoacán");
        assert_eq!(property.status, PropertyStatus::Available);
        assert_eq!(property.currency, "USD");
        assert_eq!(property.address, None);
        assert_eq!(property.city.as_deref(), Some("CDMX"));
        assert!(!property.highlighted);
        assert_eq!(property.created_at, property.updated_at);
    }

    #[test]
    fn property_draft_rejects_bad_values() {
        let mut bad = draft();
        bad.price = 0;
        assert_eq!(bad.validate(), Err(ValidationError::Price));

        let mut bad = draft();
        bad.currency = Some("usd".into());
        assert!(matches!(bad.validate(), Err(ValidationError::Currency(_))));

        let mut bad = draft();
        bad.title = " ".into();
        assert_eq!(bad.validate(), Err(ValidationError::Empty { field: "title" }));

        let mut bad = draft();
        bad.area_m2 = Some(-3.0);
        assert_eq!(bad.validate(), Err(ValidationError::Area));
    }

    #[test]
    fn patch_cannot_carry_code() {
        let result = serde_json::from_value::<PropertyPatch>(json!({ "code": "P-00001" }));
        assert!(result.is_err());
        let result = serde_json::from_value::<LeadPatch>(json!({ "code": "L-00001" }));
        assert!(result.is_err());
    }

    #[test]
    fn property_patch_keeps_code_and_bumps_updated_at() {
        let created = Utc::now();
        let mut property = draft().into_property(
            "prop-1".into(),
            Code::format(Category::Property, 1, 5),
            "user-1",
            created,
        );
        let later = created + chrono::Duration::minutes(5);

        property
            .apply(
                PropertyPatch {
                    price: Some(4_200_000),
                    status: Some(PropertyStatus::Reserved),
                    ..PropertyPatch::default()
                },
                later,
            )
            .expect("patch applies");

        assert_eq!(property.code.as_str(), "P-00001");
        assert_eq!(property.price, 4_200_000);
        assert_eq!(property.status, PropertyStatus::Reserved);
        assert_eq!(property.updated_at, later);
        assert_eq!(property.created_at, created);
    }

    #[test]
    fn lead_requires_a_contact_channel() {
        let draft: LeadDraft = serde_json::from_value(json!({
            "name": "Sin contacto",
            "email": " ",
            "source": "website"
        }))
        .unwrap();
        assert_eq!(draft.validate(), Err(ValidationError::MissingContact));

        let mut existing = lead();
        let err = existing
            .apply(
                LeadPatch {
                    phone: Some(String::new()),
                    ..LeadPatch::default()
                },
                Utc::now(),
            )
            .expect_err("clearing the only channel fails");
        assert_eq!(err, ValidationError::MissingContact);
    }

    #[test]
    fn lead_validates_email_and_phone() {
        let mut draft: LeadDraft = serde_json::from_value(json!({
            "name": "Luis",
            "email": "luis@example",
            "source": "portal"
        }))
        .unwrap();
        assert!(matches!(draft.validate(), Err(ValidationError::Email(_))));

        draft.email = Some("luis@example.com".into());
        draft.phone = Some("12ab".into());
        assert!(matches!(draft.validate(), Err(ValidationError::Phone(_))));

        draft.phone = Some("(55) 1234-5678".into());
        assert_eq!(draft.validate(), Ok(()));
    }

    #[test]
    fn closing_a_lead_clears_follow_up() {
        let mut lead = lead();
        lead.follow_up_on = NaiveDate::from_ymd_opt(2024, 5, 1);
        lead.apply(
            LeadPatch {
                status: Some(LeadStatus::Won),
                ..LeadPatch::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(lead.follow_up_on, None);
        assert_eq!(lead.code.as_str(), "L-00012");
    }

    #[test]
    fn enums_round_trip_database_strings() {
        assert_eq!(LeadSource::parse("walk_in"), Some(LeadSource::WalkIn));
        assert_eq!(LeadSource::WalkIn.as_str(), "walk_in");
        assert_eq!(PropertyKind::parse("castle"), None);
        assert!(LeadStatus::Lost.is_closed());
        assert!(!LeadStatus::Negotiating.is_closed());
    }
}
