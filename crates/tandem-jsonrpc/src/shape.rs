//! Shape hints describing the expected structure of params and results.

use std::fmt;

/// Expected structural type of a JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Shape {
    /// No expectation, the value is kept as generic JSON
    #[default]
    Any,
    Null,
    Bool,
    Number,
    Integer,
    String,
    Array(Box<Shape>),
    Object(ObjectShape),
    /// Union of two shapes; the left one is tried first
    Either(Box<Shape>, Box<Shape>),
}

impl Shape {
    pub fn array(items: Shape) -> Self {
        Shape::Array(Box::new(items))
    }

    pub fn either(left: Shape, right: Shape) -> Self {
        Shape::Either(Box::new(left), Box::new(right))
    }

    pub fn object() -> ObjectShape {
        ObjectShape::default()
    }

    /// An object with no declared fields. Any object matches.
    pub fn empty_object() -> Self {
        Shape::Object(ObjectShape::default())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Any => write!(f, "any"),
            Shape::Null => write!(f, "null"),
            Shape::Bool => write!(f, "boolean"),
            Shape::Number => write!(f, "number"),
            Shape::Integer => write!(f, "integer"),
            Shape::String => write!(f, "string"),
            Shape::Array(items) => write!(f, "array of {}", items),
            Shape::Object(object) => {
                let required: Vec<&str> = object
                    .fields
                    .iter()
                    .filter(|field| field.required)
                    .map(|field| field.name.as_str())
                    .collect();
                if required.is_empty() {
                    write!(f, "object")
                } else {
                    write!(f, "object with {}", required.join(", "))
                }
            }
            Shape::Either(left, right) => write!(f, "{} or {}", left, right),
        }
    }
}

/// A declared field of an object shape
#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    pub name: String,
    pub shape: Shape,
    pub required: bool,
}

/// Object shape built from required and optional fields.
///
/// Required fields act as discriminating keys when the object is one
/// alternative of a union. Undeclared fields are accepted and kept as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectShape {
    pub fields: Vec<FieldShape>,
}

impl ObjectShape {
    pub fn required(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            shape,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            shape,
            required: false,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldShape> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn build(self) -> Shape {
        Shape::Object(self)
    }
}

impl From<ObjectShape> for Shape {
    fn from(object: ObjectShape) -> Self {
        Shape::Object(object)
    }
}
