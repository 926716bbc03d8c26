//! Documents written by scenarios

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A person record; identity is assigned by the driver on insert
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<ObjectId>,
    pub name: String,
    pub age: i32,
    pub city: String,
}

impl Person {
    pub fn new(name: &str, age: i32, city: &str) -> Self {
        Person {
            id: None,
            name: name.to_string(),
            age,
            city: city.to_string(),
        }
    }
}

/// The three records every scenario draws from
pub fn sample_people() -> Vec<Person> {
    vec![
        Person::new("Alice", 30, "New York"),
        Person::new("Bob", 25, "San Francisco"),
        Person::new("Charlie", 35, "Los Angeles"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson;

    #[test]
    fn test_unassigned_id_is_not_serialized() {
        let doc = bson::to_document(&Person::new("Alice", 30, "New York")).unwrap();
        assert!(!doc.contains_key("_id"));
        assert_eq!(doc.get_str("city").unwrap(), "New York");
    }

    #[test]
    fn test_assigned_id_round_trips() {
        let mut person = Person::new("Bob", 25, "San Francisco");
        person.id = Some(ObjectId::new());
        let doc = bson::to_document(&person).unwrap();
        let back: Person = bson::from_document(doc).unwrap();
        assert_eq!(back, person);
    }
}
