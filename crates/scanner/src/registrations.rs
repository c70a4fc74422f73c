// Registration Collector
//
// Finds `.on_queue(name, handler)` and `.on_schedule(name, interval, handler)`
// method calls in function bodies, in source order. Nested modules are visited
// as their own graph entries, so the collector does not descend into them.
//
// Local bindings (parameters, `let`, `for`, closure and match patterns, items
// declared inside a block) are tracked so that a local shadowing a module
// constant is never taken for that constant. Upper-case identifiers in
// patterns count as bindings too, which may omit a registration that reuses a
// constant pattern.

use crate::module_graph::is_cfg_test;
use std::collections::HashSet;
use switchyard_core::domain::ResourceKind;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{Expr, Pat};

pub(crate) const QUEUE_METHOD: &str = "on_queue";
pub(crate) const SCHEDULE_METHOD: &str = "on_schedule";

/// A registration call site, not yet evaluated
#[derive(Debug, Clone)]
pub(crate) struct CallSite {
    pub kind: ResourceKind,
    pub name: Expr,
    pub interval: Option<Expr>,
    pub line: usize,
    /// An argument refers to a local binding, so it cannot be a constant
    pub uses_local: bool,
}

#[derive(Default)]
pub(crate) struct RegistrationCollector {
    pub sites: Vec<CallSite>,
    /// Innermost scope last
    scopes: Vec<HashSet<String>>,
}

impl RegistrationCollector {
    pub fn collect(items: &[syn::Item]) -> Vec<CallSite> {
        let mut collector = Self::default();
        for item in items {
            collector.visit_item(item);
        }
        collector.sites
    }

    fn bind(&mut self, pat: &Pat) {
        let mut names = PatBindings::default();
        names.visit_pat(pat);
        if let Some(scope) = self.scopes.last_mut() {
            scope.extend(names.0);
        }
    }

    fn is_local(&self, ident: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(ident))
    }

    fn mentions_local(&self, expr: &Expr) -> bool {
        let mut finder = LocalPaths {
            collector: self,
            found: false,
        };
        finder.visit_expr(expr);
        finder.found
    }

    /// Run `f` inside a fresh function body: outer locals are not visible
    fn in_fn_body<'a>(
        &mut self,
        inputs: impl IntoIterator<Item = &'a syn::FnArg>,
        f: impl FnOnce(&mut Self),
    ) {
        let outer = std::mem::take(&mut self.scopes);
        self.scopes.push(HashSet::new());
        for input in inputs {
            if let syn::FnArg::Typed(arg) = input {
                self.bind(&arg.pat);
            }
        }
        f(self);
        self.scopes = outer;
    }

    fn in_scope(&mut self, f: impl FnOnce(&mut Self)) {
        self.scopes.push(HashSet::new());
        f(self);
        self.scopes.pop();
    }
}

impl<'ast> Visit<'ast> for RegistrationCollector {
    fn visit_item_mod(&mut self, _node: &'ast syn::ItemMod) {}

    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        if !is_cfg_test(&node.attrs) && !is_test_fn(&node.attrs) {
            self.in_fn_body(&node.sig.inputs, |this| this.visit_block(&node.block));
        }
    }

    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        if !is_cfg_test(&node.attrs) {
            visit::visit_item_impl(self, node);
        }
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        if !is_cfg_test(&node.attrs) {
            self.in_fn_body(&node.sig.inputs, |this| this.visit_block(&node.block));
        }
    }

    fn visit_block(&mut self, node: &'ast syn::Block) {
        self.in_scope(|this| {
            // Items declared in a block are visible in all of it
            let block_items = node.stmts.iter().filter_map(|stmt| match stmt {
                syn::Stmt::Item(syn::Item::Const(c)) => Some(c.ident.to_string()),
                syn::Stmt::Item(syn::Item::Static(st)) => Some(st.ident.to_string()),
                _ => None,
            });
            if let Some(scope) = this.scopes.last_mut() {
                scope.extend(block_items);
            }
            for stmt in &node.stmts {
                this.visit_stmt(stmt);
            }
        });
    }

    fn visit_local(&mut self, node: &'ast syn::Local) {
        if let Some(init) = &node.init {
            self.visit_expr(&init.expr);
            if let Some((_, diverge)) = &init.diverge {
                self.visit_expr(diverge);
            }
        }
        self.bind(&node.pat);
    }

    fn visit_expr_closure(&mut self, node: &'ast syn::ExprClosure) {
        self.in_scope(|this| {
            for input in &node.inputs {
                this.bind(input);
            }
            this.visit_expr(&node.body);
        });
    }

    fn visit_expr_for_loop(&mut self, node: &'ast syn::ExprForLoop) {
        self.visit_expr(&node.expr);
        self.in_scope(|this| {
            this.bind(&node.pat);
            this.visit_block(&node.body);
        });
    }

    fn visit_arm(&mut self, node: &'ast syn::Arm) {
        self.in_scope(|this| {
            this.bind(&node.pat);
            if let Some((_, guard)) = &node.guard {
                this.visit_expr(guard);
            }
            this.visit_expr(&node.body);
        });
    }

    fn visit_expr_if(&mut self, node: &'ast syn::ExprIf) {
        // `if let` bindings reach the condition's tail and the then-branch
        self.in_scope(|this| {
            this.visit_expr(&node.cond);
            this.visit_block(&node.then_branch);
        });
        if let Some((_, else_branch)) = &node.else_branch {
            self.visit_expr(else_branch);
        }
    }

    fn visit_expr_while(&mut self, node: &'ast syn::ExprWhile) {
        self.in_scope(|this| {
            this.visit_expr(&node.cond);
            this.visit_block(&node.body);
        });
    }

    fn visit_expr_let(&mut self, node: &'ast syn::ExprLet) {
        self.visit_expr(&node.expr);
        self.bind(&node.pat);
    }

    fn visit_expr_method_call(&mut self, node: &'ast syn::ExprMethodCall) {
        // Builder chains nest: `b.on_queue(..).on_schedule(..)` has the queue
        // call as receiver, so the receiver goes first to keep source order
        self.visit_expr(&node.receiver);

        let method = node.method.to_string();
        let args: Vec<&Expr> = node.args.iter().collect();
        let line = node.method.span().start().line;

        let site = match (method.as_str(), args.as_slice()) {
            (QUEUE_METHOD, [name, _handler]) => Some(CallSite {
                kind: ResourceKind::Queue,
                name: (*name).clone(),
                interval: None,
                line,
                uses_local: self.mentions_local(name),
            }),
            (SCHEDULE_METHOD, [name, interval, _handler]) => Some(CallSite {
                kind: ResourceKind::Schedule,
                name: (*name).clone(),
                interval: Some((*interval).clone()),
                line,
                uses_local: self.mentions_local(name) || self.mentions_local(interval),
            }),
            _ => None,
        };
        if let Some(site) = site {
            self.sites.push(site);
        }

        for arg in &node.args {
            self.visit_expr(arg);
        }
    }
}

/// Identifiers bound by a pattern
#[derive(Default)]
struct PatBindings(Vec<String>);

impl<'ast> Visit<'ast> for PatBindings {
    fn visit_pat_ident(&mut self, node: &'ast syn::PatIdent) {
        self.0.push(node.ident.to_string());
        visit::visit_pat_ident(self, node);
    }
}

/// Looks for single-segment paths naming a local binding
struct LocalPaths<'a> {
    collector: &'a RegistrationCollector,
    found: bool,
}

impl<'ast> Visit<'ast> for LocalPaths<'_> {
    fn visit_expr_path(&mut self, node: &'ast syn::ExprPath) {
        if node.qself.is_none() {
            if let Some(ident) = node.path.get_ident() {
                if self.collector.is_local(&ident.to_string()) {
                    self.found = true;
                }
            }
        }
        visit::visit_expr_path(self, node);
    }
}

fn is_test_fn(attrs: &[syn::Attribute]) -> bool {
    attrs
        .iter()
        .any(|attr| attr.path().segments.last().is_some_and(|seg| seg.ident == "test"))
}
