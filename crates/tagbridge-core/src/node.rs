/*!
 * The tag tree.
 *
 * Folders and variables form a tree with path-based identity. Each device
 * gets a folder under the root and its driver populates it during
 * initialization; after that the tree is only read. Parents are weak
 * back-references, ownership always flows from a folder to its children.
 */
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{Error, Result};
use crate::types::DataType;

/// Separator between path segments
pub const PATH_SEPARATOR: char = '/';

/// Identity shared by every node: name, path and rendered path string
#[derive(Debug, Clone)]
struct NodeInfo {
    name: String,
    path: Vec<String>,
    path_string: String,
}

impl NodeInfo {
    fn root() -> Self {
        Self {
            name: String::new(),
            path: Vec::new(),
            path_string: String::new(),
        }
    }

    fn child_of(parent: &NodeInfo, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(PATH_SEPARATOR) {
            return Err(Error::InvalidNodeName(name.to_string()));
        }
        let mut path = parent.path.clone();
        path.push(name.to_string());
        let path_string = if parent.path_string.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", parent.path_string, PATH_SEPARATOR, name)
        };
        Ok(Self {
            name: name.to_string(),
            path,
            path_string,
        })
    }
}

/// Behaviour common to folders and variables
pub trait TreeNode {
    /// The node name, empty for the root
    fn name(&self) -> &str;

    /// Names of all ancestors below the root, ending with this node's name
    fn path(&self) -> &[String];

    /// The path joined with `/`; the root renders as the empty string
    fn path_string(&self) -> &str;

    /// The containing folder, `None` for the root
    fn parent(&self) -> Option<Arc<FolderNode>>;

    /// Whether `other` lies at or below this node.
    ///
    /// Paths are compared segment by segment, so `dev1` is not a parent of
    /// `dev10/x`.
    fn is_parent_of<N: TreeNode + ?Sized>(&self, other: &N) -> bool {
        other.path().starts_with(self.path())
    }

    /// Whether this node lies at or below `other`, comparing whole segments
    fn is_child_of<N: TreeNode + ?Sized>(&self, other: &N) -> bool {
        self.path().starts_with(other.path())
    }
}

/// A grouping node with an ordered, append-only list of children
pub struct FolderNode {
    info: NodeInfo,
    parent: Weak<FolderNode>,
    children: Mutex<Vec<Node>>,
}

/// A value-carrying tag
pub struct VariableNode {
    info: NodeInfo,
    parent: Weak<FolderNode>,
    data_type: DataType,
    writable: bool,
}

/// A variable that accepts writes.
///
/// Only obtainable from a writable [`VariableNode`], so write paths that take
/// this type can never be handed a read-only tag.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WritableVariable(Arc<VariableNode>);

/// A child entry of a folder
#[derive(Clone)]
pub enum Node {
    /// A sub-folder
    Folder(Arc<FolderNode>),
    /// A variable
    Variable(Arc<VariableNode>),
}

impl FolderNode {
    /// Create a new root folder
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            info: NodeInfo::root(),
            parent: Weak::new(),
            children: Mutex::new(Vec::new()),
        })
    }

    fn lock_children(&self) -> MutexGuard<'_, Vec<Node>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a sub-folder
    pub fn add_folder(self: &Arc<Self>, name: &str) -> Result<Arc<FolderNode>> {
        let folder = Arc::new(FolderNode {
            info: NodeInfo::child_of(&self.info, name)?,
            parent: Arc::downgrade(self),
            children: Mutex::new(Vec::new()),
        });
        self.add_child(Node::Folder(folder.clone()))?;
        Ok(folder)
    }

    /// Add a read-only variable
    pub fn add_variable_read_only(
        self: &Arc<Self>,
        name: &str,
        data_type: DataType,
    ) -> Result<Arc<VariableNode>> {
        self.add_variable(name, data_type, false)
    }

    /// Add a variable that accepts writes
    pub fn add_variable_read_write(
        self: &Arc<Self>,
        name: &str,
        data_type: DataType,
    ) -> Result<WritableVariable> {
        let variable = self.add_variable(name, data_type, true)?;
        Ok(WritableVariable(variable))
    }

    fn add_variable(
        self: &Arc<Self>,
        name: &str,
        data_type: DataType,
        writable: bool,
    ) -> Result<Arc<VariableNode>> {
        let variable = Arc::new(VariableNode {
            info: NodeInfo::child_of(&self.info, name)?,
            parent: Arc::downgrade(self),
            data_type,
            writable,
        });
        self.add_child(Node::Variable(variable.clone()))?;
        Ok(variable)
    }

    fn add_child(&self, child: Node) -> Result<()> {
        let mut children = self.lock_children();
        if children.iter().any(|c| c.name() == child.name()) {
            return Err(Error::DuplicateNode(child.path_string().to_string()));
        }
        children.push(child);
        Ok(())
    }

    /// Look up a direct child by name
    pub fn child(&self, name: &str) -> Option<Node> {
        self.lock_children()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Snapshot of all direct children in insertion order
    pub fn children(&self) -> Vec<Node> {
        self.lock_children().clone()
    }

    /// Direct sub-folders in insertion order
    pub fn child_folders(&self) -> Vec<Arc<FolderNode>> {
        self.lock_children()
            .iter()
            .filter_map(|c| match c {
                Node::Folder(f) => Some(f.clone()),
                Node::Variable(_) => None,
            })
            .collect()
    }

    /// Direct variables in insertion order
    pub fn child_variables(&self) -> Vec<Arc<VariableNode>> {
        self.lock_children()
            .iter()
            .filter_map(|c| match c {
                Node::Variable(v) => Some(v.clone()),
                Node::Folder(_) => None,
            })
            .collect()
    }

    /// All variables at or below this folder, depth first
    pub fn walk_variables(&self) -> Vec<Arc<VariableNode>> {
        let mut out = Vec::new();
        for child in self.children() {
            match child {
                Node::Variable(v) => out.push(v),
                Node::Folder(f) => out.extend(f.walk_variables()),
            }
        }
        out
    }

    /// Resolve a `/`-joined path relative to this folder
    pub fn find(&self, path: &str) -> Option<Node> {
        let mut segments = path
            .split(PATH_SEPARATOR)
            .filter(|s| !s.is_empty())
            .peekable();
        let first = segments.next()?;
        let mut current = self.child(first)?;
        while segments.peek().is_some() {
            let next = segments.next()?;
            current = match current {
                Node::Folder(f) => f.child(next)?,
                Node::Variable(_) => return None,
            };
        }
        Some(current)
    }

    /// Resolve a `/`-joined path to a variable
    pub fn find_variable(&self, path: &str) -> Result<Arc<VariableNode>> {
        match self.find(path) {
            Some(Node::Variable(v)) => Ok(v),
            Some(Node::Folder(_)) => Err(Error::not_found(format!("{} is a folder", path))),
            None => Err(Error::not_found(format!("No variable at {}", path))),
        }
    }
}

impl TreeNode for FolderNode {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn path(&self) -> &[String] {
        &self.info.path
    }

    fn path_string(&self) -> &str {
        &self.info.path_string
    }

    fn parent(&self) -> Option<Arc<FolderNode>> {
        self.parent.upgrade()
    }
}

impl VariableNode {
    /// The declared data type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether the variable accepts writes
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The writable handle for this variable, if it accepts writes
    pub fn as_writable(self: &Arc<Self>) -> Option<WritableVariable> {
        self.writable.then(|| WritableVariable(self.clone()))
    }
}

impl TreeNode for VariableNode {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn path(&self) -> &[String] {
        &self.info.path
    }

    fn path_string(&self) -> &str {
        &self.info.path_string
    }

    fn parent(&self) -> Option<Arc<FolderNode>> {
        self.parent.upgrade()
    }
}

impl WritableVariable {
    /// The underlying variable node
    pub fn variable(&self) -> &Arc<VariableNode> {
        &self.0
    }
}

impl Deref for WritableVariable {
    type Target = VariableNode;

    fn deref(&self) -> &VariableNode {
        &self.0
    }
}

impl TreeNode for Node {
    fn name(&self) -> &str {
        match self {
            Node::Folder(f) => f.name(),
            Node::Variable(v) => v.name(),
        }
    }

    fn path(&self) -> &[String] {
        match self {
            Node::Folder(f) => f.path(),
            Node::Variable(v) => v.path(),
        }
    }

    fn path_string(&self) -> &str {
        match self {
            Node::Folder(f) => f.path_string(),
            Node::Variable(v) => v.path_string(),
        }
    }

    fn parent(&self) -> Option<Arc<FolderNode>> {
        match self {
            Node::Folder(f) => f.parent(),
            Node::Variable(v) => v.parent(),
        }
    }
}

impl PartialEq for FolderNode {
    fn eq(&self, other: &Self) -> bool {
        self.info.path == other.info.path
    }
}

impl Eq for FolderNode {}

impl Hash for FolderNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.info.path.hash(state);
    }
}

impl PartialEq for VariableNode {
    fn eq(&self, other: &Self) -> bool {
        self.info.path == other.info.path
    }
}

impl Eq for VariableNode {}

impl Hash for VariableNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.info.path.hash(state);
    }
}

impl fmt::Debug for FolderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderNode")
            .field("path", &self.info.path_string)
            .field("children", &self.lock_children().len())
            .finish()
    }
}

impl fmt::Debug for VariableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableNode")
            .field("path", &self.info.path_string)
            .field("data_type", &self.data_type)
            .field("writable", &self.writable)
            .finish()
    }
}

impl fmt::Debug for WritableVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WritableVariable")
            .field(&self.0.info.path_string)
            .finish()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Folder(folder) => folder.fmt(f),
            Node::Variable(variable) => variable.fmt(f),
        }
    }
}
