//! Per-object property trees.
//!
//! Properties form a hierarchy of AVL trees: each node is keyed by one
//! case-insensitive path segment and may carry both a value and a child
//! directory. Paths are slash-delimited; lookups never auto-vivify.

use crate::dbref::Dbref;
use crate::error::Error;
use crate::lock::Boolexp;
use std::cmp::Ordering;

/// Path separator between property name segments.
pub const PROPDIR_DELIMITER: char = '/';

/// Reserved system directory; never readable or writable from outside
/// the blessed path.
pub const SYSTEM_DIR: &str = "@__sys__";

pub const PROP_PRIVATE_CH: char = '.';
pub const PROP_HIDDEN_CH: char = '@';
pub const PROP_READONLY_CH: char = '~';
pub const PROP_SEEONLY_CH: char = '_';
pub const PROP_SYSPERMS_CH: char = '%';

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct PropFlags: u16 {
        const READONLY   = 0x01;
        const PRIVATE    = 0x02;
        const SEEONLY    = 0x04;
        const HIDDEN     = 0x08;
        const SYSTEM     = 0x10;
        const ISUNLOADED = 0x20;
        const DIRTY      = 0x40;
        const SYSPERMS   = 0x80;
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PropValue {
    /// Directory-only node: no direct value, interpretation comes from
    /// the child tree.
    Dir,
    Int(i32),
    Float(f64),
    Str(String),
    Ref(Dbref),
    Lock(Boolexp),
    /// Stub left by the paging store; the subtree lives on disk.
    Unloaded,
}

impl PropValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropValue::Dir => "directory",
            PropValue::Int(_) => "integer",
            PropValue::Float(_) => "float",
            PropValue::Str(_) => "string",
            PropValue::Ref(_) => "dbref",
            PropValue::Lock(_) => "lock",
            PropValue::Unloaded => "unloaded",
        }
    }
}

/// One node of a property AVL tree.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PropNode {
    pub name: String,
    pub flags: PropFlags,
    pub value: PropValue,
    /// Root of the child directory tree, if any.
    pub dir: Option<Box<PropNode>>,
    left: Option<Box<PropNode>>,
    right: Option<Box<PropNode>>,
    height: i32,
}

impl PropNode {
    fn new(name: &str) -> Self {
        PropNode {
            name: name.to_string(),
            flags: PropFlags::DIRTY,
            value: PropValue::Dir,
            dir: None,
            left: None,
            right: None,
            height: 1,
        }
    }

    /// Synthetic wrapper carrying a whole directory tree under one
    /// paging record.
    pub fn wrap_dir(dir: Option<Box<PropNode>>) -> Self {
        PropNode {
            name: String::new(),
            flags: PropFlags::empty(),
            value: PropValue::Dir,
            dir,
            left: None,
            right: None,
            height: 1,
        }
    }

    pub fn is_unloaded(&self) -> bool {
        self.flags.contains(PropFlags::ISUNLOADED)
    }

    /// Mark the node as paged out. The value is dropped; the paging
    /// store keeps the subtree.
    pub fn set_unloaded(&mut self) {
        self.value = PropValue::Unloaded;
        self.dir = None;
        self.flags.insert(PropFlags::ISUNLOADED);
    }

    /// A node is directory-only when it has children but no value of
    /// its own.
    pub fn is_dir_only(&self) -> bool {
        matches!(self.value, PropValue::Dir) && self.dir.is_some()
    }
}

/// Case-insensitive segment ordering (ASCII).
fn seg_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.bytes().map(|c| c.to_ascii_lowercase());
    let mut bi = b.bytes().map(|c| c.to_ascii_lowercase());
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

/// Split a property path into its non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PROPDIR_DELIMITER).filter(|s| !s.is_empty())
}

/// Does any segment of `name` begin with `what`?
pub fn prop_check(name: &str, what: char) -> bool {
    segments(name).any(|seg| seg.starts_with(what))
}

pub fn is_prop_hidden(name: &str) -> bool {
    prop_check(name, PROP_HIDDEN_CH)
}

pub fn is_prop_private(name: &str) -> bool {
    prop_check(name, PROP_PRIVATE_CH)
}

pub fn is_prop_readonly(name: &str) -> bool {
    prop_check(name, PROP_READONLY_CH) || prop_check(name, PROP_SEEONLY_CH)
}

pub fn is_prop_system(name: &str) -> bool {
    segments(name)
        .next()
        .is_some_and(|seg| seg.eq_ignore_ascii_case(SYSTEM_DIR))
}

/// Who is asking for a property, for the permission filter.
#[derive(Debug, Clone, Copy)]
pub struct PropPerms {
    /// Wizard-equivalent (blessed) context.
    pub blessed: bool,
    /// Caller's effective owner matches the object owner.
    pub owner_ok: bool,
}

impl PropPerms {
    pub const BLESSED: PropPerms = PropPerms { blessed: true, owner_ok: true };

    /// Permission filter applied at every externally-originated read.
    pub fn can_read(&self, path: &str) -> bool {
        if self.blessed {
            return !is_prop_system(path);
        }
        if is_prop_system(path) || is_prop_hidden(path) {
            return false;
        }
        if is_prop_private(path) && !self.owner_ok {
            return false;
        }
        true
    }

    /// Permission filter applied at every externally-originated write.
    pub fn can_write(&self, path: &str) -> bool {
        if self.blessed {
            return !is_prop_system(path);
        }
        self.can_read(path) && !is_prop_readonly(path)
    }
}

fn height(n: &Option<Box<PropNode>>) -> i32 {
    n.as_ref().map_or(0, |b| b.height)
}

fn diff(n: &PropNode) -> i32 {
    height(&n.right) - height(&n.left)
}

fn fixup_height(n: &mut PropNode) {
    n.height = 1 + height(&n.left).max(height(&n.right));
}

fn rotate_left(mut a: Box<PropNode>) -> Box<PropNode> {
    let mut b = a.right.take().unwrap();
    a.right = b.left.take();
    fixup_height(&mut a);
    b.left = Some(a);
    fixup_height(&mut b);
    b
}

fn rotate_right(mut a: Box<PropNode>) -> Box<PropNode> {
    let mut b = a.left.take().unwrap();
    a.left = b.right.take();
    fixup_height(&mut a);
    b.right = Some(a);
    fixup_height(&mut b);
    b
}

/// Restore AVL balance at `a` after an insertion or deletion below it.
fn balance(mut a: Box<PropNode>) -> Box<PropNode> {
    let dh = diff(&a);
    if dh.abs() < 2 {
        fixup_height(&mut a);
        a
    } else if dh == 2 {
        if a.right.as_ref().map_or(0, |r| diff(r)) >= 0 {
            rotate_left(a)
        } else {
            let r = a.right.take().unwrap();
            a.right = Some(rotate_right(r));
            rotate_left(a)
        }
    } else if a.left.as_ref().map_or(0, |l| diff(l)) <= 0 {
        rotate_right(a)
    } else {
        let l = a.left.take().unwrap();
        a.left = Some(rotate_left(l));
        rotate_right(a)
    }
}

/// Insert a node named `name` if absent.
fn insert_node(root: &mut Option<Box<PropNode>>, name: &str) {
    match root {
        None => *root = Some(Box::new(PropNode::new(name))),
        Some(node) => {
            match seg_cmp(name, &node.name) {
                Ordering::Less => insert_node(&mut node.left, name),
                Ordering::Greater => insert_node(&mut node.right, name),
                Ordering::Equal => return,
            }
            let taken = root.take().unwrap();
            *root = Some(balance(taken));
        }
    }
}

fn rightmost_name(mut n: &PropNode) -> String {
    while let Some(r) = n.right.as_deref() {
        n = r;
    }
    n.name.clone()
}

/// Detach the node named `name`, rebalancing along the way back up.
/// Two-child deletions swap in the in-order predecessor.
fn remove_node(root: &mut Option<Box<PropNode>>, name: &str) -> Option<Box<PropNode>> {
    let mut node = root.take()?;
    match seg_cmp(name, &node.name) {
        Ordering::Less => {
            let removed = remove_node(&mut node.left, name);
            *root = Some(balance(node));
            removed
        }
        Ordering::Greater => {
            let removed = remove_node(&mut node.right, name);
            *root = Some(balance(node));
            removed
        }
        Ordering::Equal => {
            match (node.left.take(), node.right.take()) {
                (None, right) => *root = right,
                (left, None) => *root = left,
                (Some(left), Some(right)) => {
                    let mut leftopt = Some(left);
                    let pred_name = rightmost_name(leftopt.as_deref().unwrap());
                    // the predecessor is the rightmost of the left
                    // subtree, so it is always found
                    let mut pred = remove_node(&mut leftopt, &pred_name).unwrap();
                    pred.left = leftopt;
                    pred.right = Some(right);
                    *root = Some(balance(pred));
                }
            }
            Some(node)
        }
    }
}

fn locate<'a>(mut cur: Option<&'a PropNode>, name: &str) -> Option<&'a PropNode> {
    while let Some(node) = cur {
        match seg_cmp(name, &node.name) {
            Ordering::Less => cur = node.left.as_deref(),
            Ordering::Greater => cur = node.right.as_deref(),
            Ordering::Equal => return Some(node),
        }
    }
    None
}

fn locate_mut<'a>(mut cur: Option<&'a mut PropNode>, name: &str) -> Option<&'a mut PropNode> {
    loop {
        let node = cur?;
        match seg_cmp(name, &node.name) {
            Ordering::Less => cur = node.left.as_deref_mut(),
            Ordering::Greater => cur = node.right.as_deref_mut(),
            Ordering::Equal => return Some(node),
        }
    }
}

fn leftmost(mut n: &PropNode) -> &PropNode {
    while let Some(l) = n.left.as_deref() {
        n = l;
    }
    n
}

/// In-order successor of `name` within one directory tree.
fn next_node<'a>(node: Option<&'a PropNode>, name: &str) -> Option<&'a PropNode> {
    let node = node?;
    match seg_cmp(name, &node.name) {
        Ordering::Less => next_node(node.left.as_deref(), name).or(Some(node)),
        Ordering::Greater => next_node(node.right.as_deref(), name),
        Ordering::Equal => node.right.as_deref().map(leftmost),
    }
}

fn collect_names(n: &Option<Box<PropNode>>, out: &mut Vec<String>) {
    if let Some(node) = n {
        collect_names(&node.left, out);
        out.push(node.name.clone());
        collect_names(&node.right, out);
    }
}

/// The property tree hanging off one object.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PropTree {
    root: Option<Box<PropNode>>,
    /// The whole tree is paged out; the paging store holds it under
    /// the empty path.
    #[serde(default)]
    root_unloaded: bool,
}

impl PropTree {
    pub fn new() -> Self {
        PropTree::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none() && !self.root_unloaded
    }

    pub fn root_is_unloaded(&self) -> bool {
        self.root_unloaded
    }

    /// Page the whole tree out, leaving only the stub marker.
    pub fn set_root_unloaded(&mut self) {
        self.root = None;
        self.root_unloaded = true;
    }

    /// Detach the loaded tree (for packing into a paging record).
    pub fn take_root(&mut self) -> Option<Box<PropNode>> {
        self.root.take()
    }

    /// Install a fetched subtree at `path`. The empty path replaces the
    /// whole tree; deeper paths fill in an unloaded directory node.
    pub fn replace_subtree(&mut self, path: &str, fetched: PropNode) -> Result<(), Error> {
        if segments(path).next().is_none() {
            self.root = fetched.dir;
            self.root_unloaded = false;
            return Ok(());
        }
        match self.get_mut(path) {
            Some(node) => {
                node.value = fetched.value;
                node.dir = fetched.dir;
                node.flags = fetched.flags & !PropFlags::ISUNLOADED;
                Ok(())
            }
            None => Err(Error::BadPropPath(path.to_string())),
        }
    }

    /// Paths of every unloaded stub currently in the tree ("" for the
    /// root stub). The paging store resolves these one by one.
    pub fn unloaded_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.root_unloaded {
            out.push(String::new());
            return out;
        }
        fn walk(n: &Option<Box<PropNode>>, prefix: &str, out: &mut Vec<String>) {
            if let Some(node) = n {
                walk(&node.left, prefix, out);
                let path = if prefix.is_empty() {
                    node.name.clone()
                } else {
                    format!("{}{}{}", prefix, PROPDIR_DELIMITER, node.name)
                };
                if node.is_unloaded() {
                    out.push(path);
                } else {
                    walk(&node.dir, &path, out);
                }
                walk(&node.right, prefix, out);
            }
        }
        walk(&self.root, "", &mut out);
        out
    }

    pub fn root(&self) -> Option<&PropNode> {
        self.root.as_deref()
    }

    pub fn root_mut(&mut self) -> &mut Option<Box<PropNode>> {
        &mut self.root
    }

    /// Look up the node at `path`. Missing intermediate directories
    /// yield None; so does an empty path.
    pub fn get(&self, path: &str) -> Option<&PropNode> {
        let mut tree = self.root.as_deref();
        let mut found = None;
        for seg in segments(path) {
            let node = locate(tree, seg)?;
            tree = node.dir.as_deref();
            found = Some(node);
        }
        found
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut PropNode> {
        let segs: Vec<&str> = segments(path).collect();
        let mut tree = self.root.as_deref_mut();
        let mut iter = segs.iter().copied().peekable();
        while let Some(seg) = iter.next() {
            let node = locate_mut(tree, seg)?;
            if iter.peek().is_none() {
                return Some(node);
            }
            tree = node.dir.as_deref_mut();
        }
        None
    }

    /// The value at `path`, if the node exists and carries one.
    /// DIR-ONLY nodes answer None here but remain iterable.
    pub fn get_value(&self, path: &str) -> Option<&PropValue> {
        match self.get(path) {
            Some(node) if !matches!(node.value, PropValue::Dir | PropValue::Unloaded) => {
                Some(&node.value)
            }
            _ => None,
        }
    }

    /// Set `path` to `value`, creating intermediate directories as
    /// needed. The touched leaf is marked dirty.
    pub fn set(&mut self, path: &str, value: PropValue, flags: PropFlags) -> Result<(), Error> {
        let segs: Vec<&str> = segments(path).collect();
        if segs.is_empty() {
            return Err(Error::BadPropPath(path.to_string()));
        }
        let mut root: &mut Option<Box<PropNode>> = &mut self.root;
        for (i, seg) in segs.iter().copied().enumerate() {
            insert_node(root, seg);
            // just inserted (or already present)
            let node = locate_mut(root.as_deref_mut(), seg).unwrap();
            if i + 1 == segs.len() {
                node.value = value;
                node.flags = flags | PropFlags::DIRTY;
                return Ok(());
            }
            root = &mut node.dir;
        }
        unreachable!("segments() yielded at least one segment");
    }

    /// Remove the leaf at `path`. Emptied parent directories are left
    /// in place. Returns true if something was removed.
    pub fn delete(&mut self, path: &str) -> bool {
        let segs: Vec<&str> = segments(path).collect();
        let Some((&last_seg, dirs)) = segs.split_last() else {
            return false;
        };
        let mut root: &mut Option<Box<PropNode>> = &mut self.root;
        for seg in dirs.iter().copied() {
            match locate_mut(root.as_deref_mut(), seg) {
                Some(node) => root = &mut node.dir,
                None => return false,
            }
        }
        remove_node(root, last_seg).is_some()
    }

    /// In-order names of the directory at `dir_path` ("" = top level).
    pub fn dir_entries(&self, dir_path: &str) -> Vec<String> {
        let mut out = Vec::new();
        match self.dir_root(dir_path) {
            Some(root) => collect_names(root, &mut out),
            None => {}
        }
        out
    }

    /// First name in a directory, for cursor-style iteration.
    pub fn first_in(&self, dir_path: &str) -> Option<String> {
        self.dir_root(dir_path)?
            .as_deref()
            .map(|n| leftmost(n).name.clone())
    }

    /// Name after `prev` in a directory, or None at the end.
    pub fn next_in(&self, dir_path: &str, prev: &str) -> Option<String> {
        let root = self.dir_root(dir_path)?;
        next_node(root.as_deref(), prev).map(|n| n.name.clone())
    }

    fn dir_root(&self, dir_path: &str) -> Option<&Option<Box<PropNode>>> {
        if segments(dir_path).next().is_none() {
            return Some(&self.root);
        }
        self.get(dir_path).map(|n| &n.dir)
    }

    /// Path of the shallowest unloaded directory crossed by `path`,
    /// if any ("" for a paged-out root). The paging store resolves it
    /// before a retry.
    pub fn unloaded_prefix(&self, path: &str) -> Option<String> {
        if self.root_unloaded {
            return Some(String::new());
        }
        let mut tree = self.root.as_deref();
        let mut walked = String::new();
        for seg in segments(path) {
            let node = locate(tree, seg)?;
            if !walked.is_empty() {
                walked.push(PROPDIR_DELIMITER);
            }
            walked.push_str(&node.name);
            if node.is_unloaded() {
                return Some(walked);
            }
            tree = node.dir.as_deref();
        }
        None
    }

    /// Bytes the loaded portion of the tree occupies, roughly.
    pub fn size(&self) -> usize {
        fn walk(n: &Option<Box<PropNode>>) -> usize {
            match n {
                None => 0,
                Some(node) => {
                    let own = std::mem::size_of::<PropNode>()
                        + node.name.len()
                        + match &node.value {
                            PropValue::Str(s) => s.len() + 1,
                            PropValue::Lock(l) => l.size(),
                            _ => 0,
                        };
                    own + walk(&node.left) + walk(&node.right) + walk(&node.dir)
                }
            }
        }
        walk(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_balanced(n: &Option<Box<PropNode>>) -> i32 {
        match n {
            None => 0,
            Some(node) => {
                let lh = assert_balanced(&node.left);
                let rh = assert_balanced(&node.right);
                assert!(
                    (lh - rh).abs() <= 1,
                    "unbalanced at {:?}: {} vs {}",
                    node.name,
                    lh,
                    rh
                );
                assert_eq!(node.height, 1 + lh.max(rh));
                if let Some(d) = &node.dir {
                    let boxed = Some(d.clone());
                    assert_balanced(&boxed);
                }
                1 + lh.max(rh)
            }
        }
    }

    #[test]
    fn set_get_case_insensitive() {
        let mut t = PropTree::new();
        t.set("_Look/Notice", PropValue::Str("hi".into()), PropFlags::empty())
            .unwrap();
        assert_eq!(
            t.get_value("_look/notice"),
            Some(&PropValue::Str("hi".into()))
        );
        assert_eq!(
            t.get_value("_LOOK/NOTICE"),
            Some(&PropValue::Str("hi".into()))
        );
        assert!(t.get_value("_look").is_none());
        assert!(t.get("_look").unwrap().is_dir_only());
    }

    #[test]
    fn missing_intermediates_do_not_vivify() {
        let t = PropTree::new();
        assert!(t.get("a/b/c").is_none());
        let mut t = PropTree::new();
        t.set("a/b", PropValue::Int(1), PropFlags::empty()).unwrap();
        assert!(t.get("a/x/c").is_none());
        assert!(t.get("a/b/c").is_none());
    }

    #[test]
    fn balance_holds_under_churn() {
        let mut t = PropTree::new();
        for i in 0..200 {
            t.set(&format!("k{:03}", i), PropValue::Int(i), PropFlags::empty())
                .unwrap();
            assert_balanced(&t.root().map(|r| Box::new(r.clone())));
        }
        // deletions exercise the predecessor-swap path
        for i in (0..200).step_by(3) {
            assert!(t.delete(&format!("k{:03}", i)));
            assert_balanced(&t.root().map(|r| Box::new(r.clone())));
        }
        for i in 0..200 {
            let present = t.get_value(&format!("k{:03}", i)).is_some();
            assert_eq!(present, i % 3 != 0);
        }
    }

    #[test]
    fn delete_leaves_empty_parents() {
        let mut t = PropTree::new();
        t.set("a/b/c", PropValue::Int(1), PropFlags::empty()).unwrap();
        assert!(t.delete("a/b/c"));
        // parent dirs survive, matching the original semantics
        assert!(t.get("a/b").is_some());
        assert!(t.get("a/b/c").is_none());
        assert!(!t.delete("a/b/c"));
    }

    #[test]
    fn dir_iteration_is_ordered() {
        let mut t = PropTree::new();
        for name in ["zebra", "Apple", "mango", "banana"] {
            t.set(&format!("fruit/{}", name), PropValue::Int(0), PropFlags::empty())
                .unwrap();
        }
        assert_eq!(t.dir_entries("fruit"), vec!["Apple", "banana", "mango", "zebra"]);

        let mut cursor = t.first_in("fruit");
        let mut seen = Vec::new();
        while let Some(name) = cursor {
            cursor = t.next_in("fruit", &name);
            seen.push(name);
        }
        assert_eq!(seen, vec!["Apple", "banana", "mango", "zebra"]);
    }

    #[test]
    fn prop_check_scans_every_segment() {
        assert!(prop_check("@secret", '@'));
        assert!(prop_check("pub/@secret/x", '@'));
        assert!(!prop_check("pub/se@cret", '@'));
        assert!(is_prop_system("@__sys__/stuff"));
        assert!(!is_prop_system("stuff/@__sys__"));
    }

    #[test]
    fn permission_filter() {
        let outsider = PropPerms { blessed: false, owner_ok: false };
        let owner = PropPerms { blessed: false, owner_ok: true };

        assert!(!outsider.can_read("@__sys__/x"));
        assert!(!PropPerms::BLESSED.can_read("@__sys__/x"));
        assert!(!outsider.can_read("@wizonly"));
        assert!(PropPerms::BLESSED.can_read("@wizonly"));
        assert!(!outsider.can_read(".private"));
        assert!(owner.can_read(".private"));
        assert!(outsider.can_read("~ro"));
        assert!(!outsider.can_write("~ro"));
        assert!(PropPerms::BLESSED.can_write("~ro"));
    }

    #[test]
    fn unloaded_prefix_detection() {
        let mut t = PropTree::new();
        t.set("deep/inner/leaf", PropValue::Int(5), PropFlags::empty())
            .unwrap();
        t.get_mut("deep/inner").unwrap().set_unloaded();
        assert_eq!(t.unloaded_prefix("deep/inner/leaf").as_deref(), Some("deep/inner"));
        assert_eq!(t.unloaded_prefix("deep").as_deref(), None);
    }
}
