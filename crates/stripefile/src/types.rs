//! The flattened type tree of a file
//!
//! Types are stored in pre-order: the root struct is id 0 and every node's
//! subtree occupies the contiguous id range `[id, maximum_id]`. Type ids are
//! the column identifiers used by statistics, include masks and predicates.

use std::fmt;

use crate::proto;

pub use crate::proto::TypeKind;

impl TypeKind {
    /// Whether values of this kind contain other columns
    pub fn is_compound(self) -> bool {
        matches!(self, TypeKind::List | TypeKind::Map | TypeKind::Struct)
    }

    /// Lowercase type name, as printed in schemas
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Boolean => "boolean",
            TypeKind::Byte => "tinyint",
            TypeKind::Short => "smallint",
            TypeKind::Int => "int",
            TypeKind::Long => "bigint",
            TypeKind::Float => "float",
            TypeKind::Double => "double",
            TypeKind::String => "string",
            TypeKind::Binary => "binary",
            TypeKind::Timestamp => "timestamp",
            TypeKind::List => "array",
            TypeKind::Map => "map",
            TypeKind::Struct => "struct",
            TypeKind::Date => "date",
        }
    }
}

/// Tree-shaped type used to describe a schema before it is flattened
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Binary,
    Timestamp,
    Date,
    List(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Struct(Vec<(String, DataType)>),
}

impl DataType {
    fn kind(&self) -> TypeKind {
        match self {
            DataType::Boolean => TypeKind::Boolean,
            DataType::Byte => TypeKind::Byte,
            DataType::Short => TypeKind::Short,
            DataType::Int => TypeKind::Int,
            DataType::Long => TypeKind::Long,
            DataType::Float => TypeKind::Float,
            DataType::Double => TypeKind::Double,
            DataType::String => TypeKind::String,
            DataType::Binary => TypeKind::Binary,
            DataType::Timestamp => TypeKind::Timestamp,
            DataType::Date => TypeKind::Date,
            DataType::List(_) => TypeKind::List,
            DataType::Map(_, _) => TypeKind::Map,
            DataType::Struct(_) => TypeKind::Struct,
        }
    }
}

/// One node of the type tree
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescription {
    id: usize,
    maximum_id: usize,
    parent: Option<usize>,
    kind: TypeKind,
    children: Vec<usize>,
    field_names: Vec<String>,
}

impl TypeDescription {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Largest id inside this node's subtree
    pub fn maximum_id(&self) -> usize {
        self.maximum_id
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Field names, only populated for structs
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }
}

/// Immutable, validated type tree
#[derive(Debug, Clone, PartialEq)]
pub struct TypeTree {
    nodes: Vec<TypeDescription>,
}

impl TypeTree {
    /// Flatten a schema; the root must be a struct
    pub fn from_data_type(root: &DataType) -> Result<Self, String> {
        if !matches!(root, DataType::Struct(_)) {
            return Err("root type must be a struct".to_string());
        }
        let mut nodes = Vec::new();
        flatten(root, None, &mut nodes);
        Ok(Self { nodes })
    }

    /// Build and validate a tree from its serialized form
    pub(crate) fn from_proto(types: &[proto::Type]) -> Result<Self, String> {
        if types.is_empty() {
            return Err("type list is empty".to_string());
        }

        let mut nodes = Vec::with_capacity(types.len());
        for (id, t) in types.iter().enumerate() {
            let kind = TypeKind::try_from(t.kind)
                .map_err(|_| format!("type {} has unknown kind {}", id, t.kind))?;
            let children: Vec<usize> = t.subtypes.iter().map(|&c| c as usize).collect();
            nodes.push(TypeDescription {
                id,
                maximum_id: id,
                parent: None,
                kind,
                children,
                field_names: t.field_names.clone(),
            });
        }

        if nodes[0].kind != TypeKind::Struct {
            return Err(format!("root type is {}, expected struct", nodes[0].kind.name()));
        }

        // Walk ids from the end so every child's maximum_id is known before its parent's
        for id in (0..nodes.len()).rev() {
            let kind = nodes[id].kind;
            let children = nodes[id].children.clone();

            let expected_children = match kind {
                TypeKind::List => Some(1),
                TypeKind::Map => Some(2),
                TypeKind::Struct => None,
                _ => Some(0),
            };
            if let Some(expected) = expected_children {
                if children.len() != expected {
                    return Err(format!(
                        "type {} ({}) has {} children, expected {}",
                        id,
                        kind.name(),
                        children.len(),
                        expected
                    ));
                }
            }
            if kind == TypeKind::Struct && nodes[id].field_names.len() != children.len() {
                return Err(format!(
                    "struct type {} has {} children but {} field names",
                    id,
                    children.len(),
                    nodes[id].field_names.len()
                ));
            }

            let mut next = id + 1;
            for &child in &children {
                if child != next || child >= nodes.len() {
                    return Err(format!(
                        "type {} lists child {} where {} was expected",
                        id, child, next
                    ));
                }
                if nodes[child].parent.is_some() {
                    return Err(format!("type {} has more than one parent", child));
                }
                nodes[child].parent = Some(id);
                next = nodes[child].maximum_id + 1;
            }
            nodes[id].maximum_id = next - 1;
        }

        if nodes[0].maximum_id != nodes.len() - 1 {
            return Err(format!(
                "types {}..{} are not reachable from the root",
                nodes[0].maximum_id + 1,
                nodes.len()
            ));
        }

        Ok(Self { nodes })
    }

    pub(crate) fn to_proto(&self) -> Vec<proto::Type> {
        self.nodes
            .iter()
            .map(|node| proto::Type {
                kind: node.kind as i32,
                subtypes: node.children.iter().map(|&c| c as u32).collect(),
                field_names: node.field_names.clone(),
            })
            .collect()
    }

    /// Number of type nodes, which is also the width of include masks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &TypeDescription {
        &self.nodes[0]
    }

    pub fn get(&self, id: usize) -> Option<&TypeDescription> {
        self.nodes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDescription> {
        self.nodes.iter()
    }

    /// Type ids of the root's fields, in field order
    pub fn top_level_columns(&self) -> &[usize] {
        &self.nodes[0].children
    }

    /// Field names of the root struct
    pub fn top_level_names(&self) -> &[String] {
        &self.nodes[0].field_names
    }

    /// Resolve a dotted field path such as `address.city` to a type id
    pub fn find_column(&self, path: &str) -> Option<usize> {
        let mut current = 0;
        for part in path.split('.') {
            let node = &self.nodes[current];
            if node.kind != TypeKind::Struct {
                return None;
            }
            let position = node.field_names.iter().position(|name| name == part)?;
            current = node.children[position];
        }
        Some(current)
    }

    /// Id of the root field whose subtree contains `id`
    pub fn top_level_ancestor(&self, id: usize) -> Option<usize> {
        if id == 0 {
            return None;
        }
        self.top_level_columns()
            .iter()
            .copied()
            .find(|&column| column <= id && id <= self.nodes[column].maximum_id)
    }
}

fn flatten(data_type: &DataType, parent: Option<usize>, nodes: &mut Vec<TypeDescription>) -> usize {
    let id = nodes.len();
    let field_names = match data_type {
        DataType::Struct(fields) => fields.iter().map(|(name, _)| name.clone()).collect(),
        _ => Vec::new(),
    };
    nodes.push(TypeDescription {
        id,
        maximum_id: id,
        parent,
        kind: data_type.kind(),
        children: Vec::new(),
        field_names,
    });

    let children: Vec<&DataType> = match data_type {
        DataType::List(element) => vec![element.as_ref()],
        DataType::Map(key, value) => vec![key.as_ref(), value.as_ref()],
        DataType::Struct(fields) => fields.iter().map(|(_, t)| t).collect(),
        _ => Vec::new(),
    };
    for child in children {
        let child_id = flatten(child, Some(id), nodes);
        nodes[id].children.push(child_id);
    }
    nodes[id].maximum_id = nodes.len() - 1;
    id
}

impl fmt::Display for TypeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(tree: &TypeTree, id: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let node = &tree.nodes[id];
            match node.kind {
                TypeKind::Struct => {
                    write!(f, "struct<")?;
                    for (i, (name, &child)) in node.field_names.iter().zip(&node.children).enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}:", name)?;
                        write_node(tree, child, f)?;
                    }
                    write!(f, ">")
                }
                TypeKind::List => {
                    write!(f, "array<")?;
                    write_node(tree, node.children[0], f)?;
                    write!(f, ">")
                }
                TypeKind::Map => {
                    write!(f, "map<")?;
                    write_node(tree, node.children[0], f)?;
                    write!(f, ",")?;
                    write_node(tree, node.children[1], f)?;
                    write!(f, ">")
                }
                kind => write!(f, "{}", kind.name()),
            }
        }
        write_node(self, 0, f)
    }
}
