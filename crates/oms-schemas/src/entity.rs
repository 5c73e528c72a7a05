//! Ontology entity model.
//!
//! `SchemaEntity` is the tagged variant over the five entity kinds. All
//! variants share an [`EntityHeader`]; operations dispatch on the tag. The
//! merge engine relies on [`BaseType::family`] / [`BaseType::widens_to`] and
//! [`Cardinality::broadens_to`], so those relations live here next to the
//! types they describe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Kind / status / visibility
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ObjectType,
    Property,
    LinkType,
    Interface,
    ActionType,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ObjectType => "object_type",
            EntityKind::Property => "property",
            EntityKind::LinkType => "link_type",
            EntityKind::Interface => "interface",
            EntityKind::ActionType => "action_type",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "object_type" => Ok(EntityKind::ObjectType),
            "property" => Ok(EntityKind::Property),
            "link_type" => Ok(EntityKind::LinkType),
            "interface" => Ok(EntityKind::Interface),
            "action_type" => Ok(EntityKind::ActionType),
            other => Err(format!("invalid entity kind: {other}")),
        }
    }

    /// All kinds, in the precedence order used when two sides of a merge
    /// disagree about what an id refers to: Interface > ObjectType >
    /// LinkType > Property > ActionType.
    pub fn precedence(&self) -> u8 {
        match self {
            EntityKind::Interface => 4,
            EntityKind::ObjectType => 3,
            EntityKind::LinkType => 2,
            EntityKind::Property => 1,
            EntityKind::ActionType => 0,
        }
    }

    pub const ALL: [EntityKind; 5] = [
        EntityKind::ObjectType,
        EntityKind::Property,
        EntityKind::LinkType,
        EntityKind::Interface,
        EntityKind::ActionType,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Experimental,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Prominent,
    Normal,
    Hidden,
}

// ---------------------------------------------------------------------------
// Shared header
// ---------------------------------------------------------------------------

/// Fields common to every entity kind.
///
/// `api_name` is unique per kind per branch; `rid` is the stable opaque
/// identifier referenced by links and properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHeader {
    pub rid: Uuid,
    pub api_name: String,
    pub display_name: String,
    pub status: EntityStatus,
    pub visibility: Visibility,
    pub created_at_utc: DateTime<Utc>,
    pub created_by: String,
    pub updated_at_utc: DateTime<Utc>,
    pub updated_by: String,
}

// ---------------------------------------------------------------------------
// Property types
// ---------------------------------------------------------------------------

/// Scalar base type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    Decimal,
    String,
    Text,
    Date,
    Timestamp,
}

impl BaseType {
    /// Type family. Widening conversions never cross families.
    pub fn family(&self) -> &'static str {
        match self {
            BaseType::Boolean => "boolean",
            BaseType::Integer | BaseType::Long => "integral",
            BaseType::Float | BaseType::Double | BaseType::Decimal => "fractional",
            BaseType::String | BaseType::Text => "textual",
            BaseType::Date | BaseType::Timestamp => "temporal",
        }
    }

    /// `true` if a value of `self` is losslessly representable as `to`.
    ///
    /// `string→text`, `int→long`, `float→double`, `date→timestamp` widen;
    /// the reverse directions narrow and everything cross-family is neither.
    pub fn widens_to(&self, to: BaseType) -> bool {
        if *self == to {
            return true;
        }
        matches!(
            (self, to),
            (BaseType::String, BaseType::Text)
                | (BaseType::Integer, BaseType::Long)
                | (BaseType::Float, BaseType::Double)
                | (BaseType::Date, BaseType::Timestamp)
        )
    }
}

/// Optional value constraints attached to a property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyConstraints {
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub enum_values: Option<Vec<String>>,
    /// Enum values removed by a merge but still accepted during their
    /// deprecation window. Writers must not emit them; readers still may.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_values: Option<Vec<String>>,
    pub pattern: Option<String>,
}

impl PropertyConstraints {
    pub fn is_empty(&self) -> bool {
        !self.required
            && self.min.is_none()
            && self.max.is_none()
            && self.enum_values.is_none()
            && self.deprecated_values.is_none()
            && self.pattern.is_none()
    }
}

// ---------------------------------------------------------------------------
// Link cardinality
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:M")]
    ManyToMany,
}

impl Cardinality {
    fn rank(&self) -> u8 {
        match self {
            Cardinality::OneToOne => 0,
            Cardinality::OneToMany => 1,
            Cardinality::ManyToMany => 2,
        }
    }

    /// `1:1 → 1:N → N:M` broadens; the reverse narrows.
    pub fn broadens_to(&self, to: Cardinality) -> bool {
        to.rank() >= self.rank()
    }
}

// ---------------------------------------------------------------------------
// Per-kind payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTypeSpec {
    pub header: EntityHeader,
    /// Interface rids this object type implements.
    pub implements: Vec<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub header: EntityHeader,
    /// Owning object type.
    pub object_rid: Uuid,
    pub base_type: BaseType,
    pub value_format: Option<String>,
    #[serde(default)]
    pub constraints: PropertyConstraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTypeSpec {
    pub header: EntityHeader,
    pub source_rid: Uuid,
    pub target_rid: Uuid,
    pub cardinality: Cardinality,
}

/// A property an interface requires of its implementors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceProperty {
    pub api_name: String,
    pub base_type: BaseType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub header: EntityHeader,
    pub required_properties: Vec<InterfaceProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTypeSpec {
    pub header: EntityHeader,
    pub function_body: String,
    pub security_rules: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tagged variant
// ---------------------------------------------------------------------------

/// The tagged variant over all entity kinds.
///
/// Serialized with an explicit `kind` tag so persisted JSON rows and wire
/// payloads are self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaEntity {
    ObjectType(ObjectTypeSpec),
    Property(PropertySpec),
    LinkType(LinkTypeSpec),
    Interface(InterfaceSpec),
    ActionType(ActionTypeSpec),
}

impl SchemaEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            SchemaEntity::ObjectType(_) => EntityKind::ObjectType,
            SchemaEntity::Property(_) => EntityKind::Property,
            SchemaEntity::LinkType(_) => EntityKind::LinkType,
            SchemaEntity::Interface(_) => EntityKind::Interface,
            SchemaEntity::ActionType(_) => EntityKind::ActionType,
        }
    }

    pub fn header(&self) -> &EntityHeader {
        match self {
            SchemaEntity::ObjectType(s) => &s.header,
            SchemaEntity::Property(s) => &s.header,
            SchemaEntity::LinkType(s) => &s.header,
            SchemaEntity::Interface(s) => &s.header,
            SchemaEntity::ActionType(s) => &s.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut EntityHeader {
        match self {
            SchemaEntity::ObjectType(s) => &mut s.header,
            SchemaEntity::Property(s) => &mut s.header,
            SchemaEntity::LinkType(s) => &mut s.header,
            SchemaEntity::Interface(s) => &mut s.header,
            SchemaEntity::ActionType(s) => &mut s.header,
        }
    }

    pub fn rid(&self) -> Uuid {
        self.header().rid
    }

    pub fn api_name(&self) -> &str {
        &self.header().api_name
    }

    /// Rids this entity refers to (link endpoints, property owner,
    /// implemented interfaces). Used for referential-integrity checks.
    pub fn references(&self) -> Vec<Uuid> {
        match self {
            SchemaEntity::ObjectType(s) => s.implements.clone(),
            SchemaEntity::Property(s) => vec![s.object_rid],
            SchemaEntity::LinkType(s) => vec![s.source_rid, s.target_rid],
            SchemaEntity::Interface(_) | SchemaEntity::ActionType(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(api_name: &str) -> EntityHeader {
        EntityHeader {
            rid: Uuid::new_v4(),
            api_name: api_name.to_string(),
            display_name: api_name.to_string(),
            status: EntityStatus::Active,
            visibility: Visibility::Normal,
            created_at_utc: Utc::now(),
            created_by: "test".to_string(),
            updated_at_utc: Utc::now(),
            updated_by: "test".to_string(),
        }
    }

    #[test]
    fn widening_is_directional_and_family_bound() {
        assert!(BaseType::Integer.widens_to(BaseType::Long));
        assert!(!BaseType::Long.widens_to(BaseType::Integer));
        assert!(BaseType::String.widens_to(BaseType::Text));
        assert!(BaseType::Float.widens_to(BaseType::Double));
        // Cross-family never widens.
        assert!(!BaseType::Integer.widens_to(BaseType::String));
        assert!(!BaseType::Boolean.widens_to(BaseType::Integer));
        // Identity widens.
        assert!(BaseType::Long.widens_to(BaseType::Long));
    }

    #[test]
    fn cardinality_broadening() {
        assert!(Cardinality::OneToOne.broadens_to(Cardinality::OneToMany));
        assert!(Cardinality::OneToMany.broadens_to(Cardinality::ManyToMany));
        assert!(!Cardinality::ManyToMany.broadens_to(Cardinality::OneToOne));
        assert!(Cardinality::OneToMany.broadens_to(Cardinality::OneToMany));
    }

    #[test]
    fn kind_precedence_orders_interface_first() {
        assert!(EntityKind::Interface.precedence() > EntityKind::ObjectType.precedence());
        assert!(EntityKind::ObjectType.precedence() > EntityKind::LinkType.precedence());
        assert!(EntityKind::LinkType.precedence() > EntityKind::Property.precedence());
    }

    #[test]
    fn entity_json_carries_kind_tag() {
        let e = SchemaEntity::Property(PropertySpec {
            header: header("total"),
            object_rid: Uuid::new_v4(),
            base_type: BaseType::Integer,
            value_format: None,
            constraints: PropertyConstraints::default(),
        });
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "property");
        assert_eq!(v["base_type"], "integer");
        let back: SchemaEntity = serde_json::from_value(v).unwrap();
        assert_eq!(back.kind(), EntityKind::Property);
    }

    #[test]
    fn references_cover_link_endpoints() {
        let src = Uuid::new_v4();
        let dst = Uuid::new_v4();
        let e = SchemaEntity::LinkType(LinkTypeSpec {
            header: header("works_at"),
            source_rid: src,
            target_rid: dst,
            cardinality: Cardinality::OneToMany,
        });
        assert_eq!(e.references(), vec![src, dst]);
    }
}
