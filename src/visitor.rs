use crate::template::{
    CompiledTemplate, ElementNode, FragmentNode, ProjectionSlot, StructuralPlaceholder,
    TemplateNode, TextNode,
};

/// The TemplateVisitor trait is the single traversal mechanism for compiled templates.
///
/// Rules:
/// 1. Traversal order is fixed: children in document order, projected content after children.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers call the matching `walk_*` function to continue unless pruning is intended.
///
/// Sub-templates live in a separate map and are visited by the caller.
pub trait TemplateVisitor {
    fn visit_node(&mut self, node: &mut TemplateNode) {
        walk_node(self, node);
    }

    fn visit_element(&mut self, element: &mut ElementNode) {
        walk_element(self, element);
    }

    fn visit_text(&mut self, _text: &mut TextNode) {
        // Leaf node
    }

    fn visit_fragment(&mut self, fragment: &mut FragmentNode) {
        walk_fragment(self, fragment);
    }

    fn visit_structural(&mut self, _placeholder: &mut StructuralPlaceholder) {
        // The wrapped host lives in the sub-template map
    }

    fn visit_slot(&mut self, slot: &mut ProjectionSlot) {
        walk_slot(self, slot);
    }

    fn visit_children(&mut self, children: &mut Vec<TemplateNode>) {
        walk_children(self, children);
    }
}

pub fn walk_children<V: TemplateVisitor + ?Sized>(visitor: &mut V, children: &mut Vec<TemplateNode>) {
    for node in children {
        visitor.visit_node(node);
    }
}

pub fn walk_node<V: TemplateVisitor + ?Sized>(visitor: &mut V, node: &mut TemplateNode) {
    match node {
        TemplateNode::Element(el) => visitor.visit_element(el),
        TemplateNode::Text(t) => visitor.visit_text(t),
        TemplateNode::Fragment(f) => visitor.visit_fragment(f),
        TemplateNode::StructuralPlaceholder(p) => visitor.visit_structural(p),
        TemplateNode::ProjectionSlot(s) => visitor.visit_slot(s),
    }
}

pub fn walk_element<V: TemplateVisitor + ?Sized>(visitor: &mut V, element: &mut ElementNode) {
    visitor.visit_children(&mut element.children);
    for projection in &mut element.projected {
        visitor.visit_children(&mut projection.nodes);
    }
}

pub fn walk_fragment<V: TemplateVisitor + ?Sized>(visitor: &mut V, fragment: &mut FragmentNode) {
    visitor.visit_children(&mut fragment.children);
}

pub fn walk_slot<V: TemplateVisitor + ?Sized>(visitor: &mut V, slot: &mut ProjectionSlot) {
    visitor.visit_children(&mut slot.fallback);
}

/// Runs `visitor` over the root nodes and then every named sub-template.
pub fn walk_compiled<V: TemplateVisitor + ?Sized>(visitor: &mut V, compiled: &mut CompiledTemplate) {
    visitor.visit_children(&mut compiled.nodes);
    for nodes in compiled.templates.values_mut() {
        visitor.visit_children(nodes);
    }
}
