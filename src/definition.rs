//!
//! Declarative resource definitions consumed by deployment tooling.
//!
//! A descriptor is a JSON document listing connection factories and destinations to provision,
//! and the contexts an application expects to be injected with:
//!
//! ```json
//! {
//!   "connectionFactories": [
//!     { "name": "java:app/jms/Orders", "interfaceName": "javax.jms.QueueConnectionFactory",
//!       "maxPoolSize": 8, "properties": ["addressList=mq://localhost:7676"] }
//!   ],
//!   "destinations": [
//!     { "name": "java:app/jms/OrderQueue", "interfaceName": "javax.jms.Queue",
//!       "destinationName": "orders" }
//!   ],
//!   "contexts": [
//!     { "lookup": "java:app/jms/Orders", "sessionMode": "CLIENT_ACKNOWLEDGE" }
//!   ]
//! }
//! ```
//!
use crate::connection::Credentials;
use crate::destination::DestinationKind;
use crate::session::AcknowledgeMode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Pool size meaning "use the provider default".
pub const UNSET_POOL_SIZE: i32 = -1;

/// Lookup name of the platform default connection factory.
pub const DEFAULT_CONNECTION_FACTORY: &str = "java:comp/DefaultJMSConnectionFactory";

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to parse resource definitions")]
    Parse(#[from] serde_json::Error),

    #[error("Resource definition has an empty name")]
    MissingName,

    #[error("Resource name `{0}` is defined more than once")]
    Duplicate(String),

    #[error("`{name}`: invalid pool size bounds, min {min}, max {max}")]
    PoolBounds { name: String, min: i32, max: i32 },

    #[error("`{name}`: property `{property}` is not a key=value pair")]
    Property { name: String, property: String },

    #[error("Context injection has an empty connection factory lookup name")]
    MissingLookup,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FactoryInterface {
    #[default]
    #[serde(rename = "javax.jms.ConnectionFactory", alias = "ConnectionFactory")]
    ConnectionFactory,
    #[serde(rename = "javax.jms.QueueConnectionFactory", alias = "QueueConnectionFactory")]
    QueueConnectionFactory,
    #[serde(rename = "javax.jms.TopicConnectionFactory", alias = "TopicConnectionFactory")]
    TopicConnectionFactory,
    #[serde(rename = "javax.jms.XAConnectionFactory", alias = "XAConnectionFactory")]
    XaConnectionFactory,
    #[serde(rename = "javax.jms.XAQueueConnectionFactory", alias = "XAQueueConnectionFactory")]
    XaQueueConnectionFactory,
    #[serde(rename = "javax.jms.XATopicConnectionFactory", alias = "XATopicConnectionFactory")]
    XaTopicConnectionFactory,
}

impl FactoryInterface {
    pub fn is_xa(self) -> bool {
        matches!(
            self,
            FactoryInterface::XaConnectionFactory
                | FactoryInterface::XaQueueConnectionFactory
                | FactoryInterface::XaTopicConnectionFactory
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationInterface {
    #[serde(rename = "javax.jms.Queue", alias = "Queue")]
    Queue,
    #[serde(rename = "javax.jms.Topic", alias = "Topic")]
    Topic,
}

impl From<DestinationInterface> for DestinationKind {
    fn from(interface: DestinationInterface) -> Self {
        match interface {
            DestinationInterface::Queue => DestinationKind::Queue,
            DestinationInterface::Topic => DestinationKind::Topic,
        }
    }
}

fn default_transactional() -> bool {
    true
}

fn unset_pool_size() -> i32 {
    UNSET_POOL_SIZE
}

fn parse_properties(name: &str, properties: &[String]) -> Result<HashMap<String, String>, DefinitionError> {
    let mut parsed = HashMap::with_capacity(properties.len());
    for property in properties {
        let (key, value) = property
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| DefinitionError::Property {
                name: name.to_owned(),
                property: property.clone(),
            })?;
        parsed.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    Ok(parsed)
}

fn check_name(name: &str) -> Result<(), DefinitionError> {
    if name.trim().is_empty() {
        return Err(DefinitionError::MissingName);
    }
    Ok(())
}

/// A connection factory to provision.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFactoryDefinition {
    /// Lookup name the factory is bound to.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interface_name: FactoryInterface,
    /// Provider implementation class, empty for the provider default.
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub resource_adapter: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub client_id: String,
    /// `key=value` pairs.
    #[serde(default)]
    pub properties: Vec<String>,
    /// Whether connections take part in the caller's transaction.
    #[serde(default = "default_transactional")]
    pub transactional: bool,
    #[serde(default = "unset_pool_size")]
    pub max_pool_size: i32,
    #[serde(default = "unset_pool_size")]
    pub min_pool_size: i32,
}

impl ConnectionFactoryDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: String::new(),
            interface_name: FactoryInterface::default(),
            class_name: String::new(),
            resource_adapter: String::new(),
            user: String::new(),
            password: String::new(),
            client_id: String::new(),
            properties: Vec::new(),
            transactional: true,
            max_pool_size: UNSET_POOL_SIZE,
            min_pool_size: UNSET_POOL_SIZE,
        }
    }

    /// `None` when no user is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.user.is_empty() {
            None
        } else {
            Some(Credentials::new(&self.user, &self.password))
        }
    }

    pub fn parsed_properties(&self) -> Result<HashMap<String, String>, DefinitionError> {
        parse_properties(&self.name, &self.properties)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        check_name(&self.name)?;
        let pool_bound = |size: i32| size == UNSET_POOL_SIZE || size >= 0;
        let ordered = self.min_pool_size == UNSET_POOL_SIZE
            || self.max_pool_size == UNSET_POOL_SIZE
            || self.min_pool_size <= self.max_pool_size;
        if !pool_bound(self.min_pool_size) || !pool_bound(self.max_pool_size) || !ordered {
            return Err(DefinitionError::PoolBounds {
                name: self.name.clone(),
                min: self.min_pool_size,
                max: self.max_pool_size,
            });
        }
        self.parsed_properties()?;
        Ok(())
    }
}

/// A destination to provision.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationDefinition {
    pub name: String,
    pub interface_name: DestinationInterface,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub resource_adapter: String,
    /// Provider side name, empty to derive it from `name`.
    #[serde(default)]
    pub destination_name: String,
    #[serde(default)]
    pub properties: Vec<String>,
}

impl DestinationDefinition {
    pub fn new(name: &str, interface_name: DestinationInterface) -> Self {
        Self {
            name: name.to_owned(),
            interface_name,
            description: String::new(),
            class_name: String::new(),
            resource_adapter: String::new(),
            destination_name: String::new(),
            properties: Vec::new(),
        }
    }

    pub fn kind(&self) -> DestinationKind {
        self.interface_name.into()
    }

    pub fn parsed_properties(&self) -> Result<HashMap<String, String>, DefinitionError> {
        parse_properties(&self.name, &self.properties)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        check_name(&self.name)?;
        self.parsed_properties()?;
        Ok(())
    }
}

/// What a component expects to be injected with when it asks for a context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextInjection {
    /// Lookup name of the connection factory backing the context.
    #[serde(default = "default_lookup")]
    pub lookup: String,
    #[serde(default)]
    pub session_mode: AcknowledgeMode,
    #[serde(default)]
    pub credential: Option<Credentials>,
}

fn default_lookup() -> String {
    DEFAULT_CONNECTION_FACTORY.to_owned()
}

impl Default for ContextInjection {
    fn default() -> Self {
        Self {
            lookup: default_lookup(),
            session_mode: AcknowledgeMode::default(),
            credential: None,
        }
    }
}

impl ContextInjection {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.lookup.trim().is_empty() {
            return Err(DefinitionError::MissingLookup);
        }
        Ok(())
    }
}

/// All definitions of one descriptor.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Definitions {
    #[serde(default)]
    pub connection_factories: Vec<ConnectionFactoryDefinition>,
    #[serde(default)]
    pub destinations: Vec<DestinationDefinition>,
    #[serde(default)]
    pub contexts: Vec<ContextInjection>,
}

impl Definitions {
    /// Parse and validate a JSON descriptor.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let definitions: Definitions = serde_json::from_str(json)?;
        definitions.validate()?;
        Ok(definitions)
    }

    pub fn to_json(&self) -> Result<String, DefinitionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Factory and destination names share one namespace.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut names = HashSet::new();
        for factory in &self.connection_factories {
            factory.validate()?;
            if !names.insert(factory.name.as_str()) {
                return Err(DefinitionError::Duplicate(factory.name.clone()));
            }
        }
        for destination in &self.destinations {
            destination.validate()?;
            if !names.insert(destination.name.as_str()) {
                return Err(DefinitionError::Duplicate(destination.name.clone()));
            }
        }
        for context in &self.contexts {
            context.validate()?;
        }
        Ok(())
    }

    pub fn connection_factory(&self, name: &str) -> Option<&ConnectionFactoryDefinition> {
        self.connection_factories.iter().find(|f| f.name == name)
    }

    pub fn destination(&self, name: &str) -> Option<&DestinationDefinition> {
        self.destinations.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const DESCRIPTOR: &str = r#"{
        "connectionFactories": [
            {
                "name": "java:app/jms/Orders",
                "interfaceName": "javax.jms.QueueConnectionFactory",
                "user": "orders",
                "password": "secret",
                "maxPoolSize": 8,
                "minPoolSize": 2,
                "properties": ["addressList=mq://localhost:7676", "reconnect = true"]
            },
            { "name": "java:app/jms/Plain" }
        ],
        "destinations": [
            {
                "name": "java:app/jms/OrderQueue",
                "interfaceName": "Queue",
                "destinationName": "orders"
            }
        ],
        "contexts": [
            { "lookup": "java:app/jms/Orders", "sessionMode": "CLIENT_ACKNOWLEDGE",
              "credential": { "userName": "orders", "password": "secret" } },
            {}
        ]
    }"#;

    #[test]
    fn test_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let definitions = Definitions::from_json(DESCRIPTOR)?;

        let orders = definitions
            .connection_factory("java:app/jms/Orders")
            .ok_or("missing factory")?;
        assert_eq!(orders.interface_name, FactoryInterface::QueueConnectionFactory);
        assert!(!orders.interface_name.is_xa());
        assert_eq!(orders.max_pool_size, 8);
        assert!(orders.transactional);
        assert_eq!(orders.credentials().map(|c| c.user_name), Some("orders".to_owned()));

        let properties = orders.parsed_properties()?;
        assert_eq!(properties.get("addressList").map(String::as_str), Some("mq://localhost:7676"));
        assert_eq!(properties.get("reconnect").map(String::as_str), Some("true"));

        let plain = definitions
            .connection_factory("java:app/jms/Plain")
            .ok_or("missing factory")?;
        assert_eq!(*plain, ConnectionFactoryDefinition::new("java:app/jms/Plain"));
        assert_eq!(plain.credentials(), None);

        let queue = definitions
            .destination("java:app/jms/OrderQueue")
            .ok_or("missing destination")?;
        assert_eq!(queue.kind(), DestinationKind::Queue);
        assert_eq!(queue.destination_name, "orders");

        assert_eq!(definitions.contexts[0].session_mode, AcknowledgeMode::ClientAcknowledge);
        assert!(definitions.contexts[0].credential.is_some());
        assert_eq!(definitions.contexts[1], ContextInjection::default());
        Ok(())
    }

    #[test]
    fn test_destination_interface_is_required() {
        let json = r#"{ "destinations": [ { "name": "java:app/jms/Nowhere" } ] }"#;
        assert_matches!(Definitions::from_json(json), Err(DefinitionError::Parse(_)));
    }

    #[test]
    fn test_invalid_pool_bounds() {
        let mut factory = ConnectionFactoryDefinition::new("pool");
        factory.min_pool_size = 4;
        factory.max_pool_size = 2;
        assert_matches!(factory.validate(), Err(DefinitionError::PoolBounds { min: 4, max: 2, .. }));

        factory.max_pool_size = UNSET_POOL_SIZE;
        assert!(factory.validate().is_ok());

        factory.min_pool_size = -3;
        assert_matches!(factory.validate(), Err(DefinitionError::PoolBounds { .. }));
    }

    #[test]
    fn test_invalid_property() {
        let mut destination = DestinationDefinition::new("topic", DestinationInterface::Topic);
        destination.properties.push("=value".to_owned());
        assert_matches!(
            destination.validate(),
            Err(DefinitionError::Property { property, .. }) if property == "=value"
        );
    }

    #[test]
    fn test_duplicate_names() {
        let definitions = Definitions {
            connection_factories: vec![ConnectionFactoryDefinition::new("shared")],
            destinations: vec![DestinationDefinition::new("shared", DestinationInterface::Queue)],
            contexts: Vec::new(),
        };
        assert_matches!(definitions.validate(), Err(DefinitionError::Duplicate(name)) if name == "shared");
    }

    #[test]
    fn test_to_json_uses_interface_names() -> Result<(), Box<dyn std::error::Error>> {
        let mut definitions = Definitions::default();
        let mut factory = ConnectionFactoryDefinition::new("xa");
        factory.interface_name = FactoryInterface::XaTopicConnectionFactory;
        definitions.connection_factories.push(factory);

        let json = definitions.to_json()?;
        assert!(json.contains("\"javax.jms.XATopicConnectionFactory\""));
        assert!(json.contains("\"maxPoolSize\": -1"));
        assert_eq!(Definitions::from_json(&json)?, definitions);
        Ok(())
    }
}
