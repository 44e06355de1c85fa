use intrusive_collections::{LinkedList, LinkedListLink, intrusive_adapter};

use crate::object::{Gobj, GobjRef};

pub type EqualFn = fn(&Gobj, &Gobj) -> bool;

#[derive(Debug)]
pub struct Node {
    link: LinkedListLink,
    val: GobjRef,
}

impl Node {
    fn new(val: GobjRef) -> Box<Self> {
        Box::new(Self {
            link: LinkedListLink::new(),
            val,
        })
    }

    pub fn val(&self) -> &GobjRef {
        &self.val
    }
}

intrusive_adapter!(pub NodeAdapter = Box<Node>: Node { link: LinkedListLink });

/// Doubly-linked list of shared values. Each node owns one reference to
/// its value; removing the node releases it.
#[derive(Debug)]
pub struct List {
    nodes: LinkedList<NodeAdapter>,
    length: usize,
    equal: EqualFn,
}

impl List {
    pub fn new(equal: EqualFn) -> Self {
        Self {
            nodes: LinkedList::new(NodeAdapter::new()),
            length: 0,
            equal,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn first(&self) -> Option<&GobjRef> {
        self.nodes.front().get().map(Node::val)
    }

    pub fn last(&self) -> Option<&GobjRef> {
        self.nodes.back().get().map(Node::val)
    }

    pub fn append(&mut self, val: GobjRef) {
        self.nodes.push_back(Node::new(val));
        self.length += 1;
    }

    pub fn lpush(&mut self, val: GobjRef) {
        self.nodes.push_front(Node::new(val));
        self.length += 1;
    }

    pub fn pop_front(&mut self) -> Option<GobjRef> {
        let node = self.nodes.pop_front()?;
        self.length -= 1;
        let Node { val, .. } = *node;
        Some(val)
    }

    /// First value equal to `val` under the list's equality function.
    pub fn find(&self, val: &Gobj) -> Option<&GobjRef> {
        self.nodes
            .iter()
            .find(|node| (self.equal)(&node.val, val))
            .map(Node::val)
    }

    /// Unlinks the first node equal to `val` and hands back its value.
    pub fn delete(&mut self, val: &Gobj) -> Option<GobjRef> {
        let mut cursor = self.nodes.front_mut();
        loop {
            let hit = match cursor.get() {
                Some(node) => (self.equal)(&node.val, val),
                None => return None,
            };
            if hit {
                let node = cursor.remove()?;
                self.length -= 1;
                let Node { val, .. } = *node;
                return Some(val);
            }
            cursor.move_next();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &GobjRef> + '_ {
        self.nodes.iter().map(Node::val)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.length = 0;
    }
}
