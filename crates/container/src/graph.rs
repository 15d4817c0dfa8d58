//! Граф зависимостей между определениями
//!
//! Строится из определений builder'а: ребро на каждую ссылку в аргументах
//! конструктора, аргументах method call'ов и вложенных (inline) определениях.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::definition::{Definition, Factory};
use crate::value::Value;

/// Вид ребра: от этого зависит, считается ли оно "жёстким"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Аргумент конструктора (или method call вложенного inline определения)
    Constructor,
    /// Аргумент method call'а, вызывается после конструирования
    MethodCall,
    /// Closure или iterator: разрешается только при использовании
    Deferred,
}

/// Ребро графа `from -> to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    /// Индекс method call'а у `from`, если ребро идёт из него
    pub call: Option<usize>,
    /// Ссылка уже помечена как lazy
    pub lazy: bool,
}

impl Edge {
    /// Ребро, которое участвует в проверке циклов
    pub fn is_hard(&self) -> bool {
        self.kind != EdgeKind::Deferred && !self.lazy
    }
}

/// Все исходящие рёбра определения в порядке объявления
pub fn definition_edges(def: &Definition) -> Vec<Edge> {
    let mut edges = Vec::new();
    let from = def.id();

    if let Some(Factory::Value { value }) = def.factory() {
        collect_value_edges(from, value, EdgeKind::Constructor, None, &mut edges);
    }
    for value in def.arguments() {
        collect_value_edges(from, value, EdgeKind::Constructor, None, &mut edges);
    }
    for (index, call) in def.method_calls().iter().enumerate() {
        for value in &call.arguments {
            collect_value_edges(from, value, EdgeKind::MethodCall, Some(index), &mut edges);
        }
    }

    edges
}

fn collect_value_edges(
    from: &str,
    value: &Value,
    kind: EdgeKind,
    call: Option<usize>,
    out: &mut Vec<Edge>,
) {
    match value {
        Value::Reference(r) => out.push(Edge {
            from: from.to_string(),
            to: r.id().to_string(),
            kind,
            call,
            lazy: r.is_lazy(),
        }),
        Value::Closure(c) => out.push(Edge {
            from: from.to_string(),
            to: c.reference().id().to_string(),
            kind: EdgeKind::Deferred,
            call,
            lazy: c.reference().is_lazy(),
        }),
        Value::Iterator(a) => {
            for v in a.values() {
                collect_value_edges(from, v, EdgeKind::Deferred, call, out);
            }
        }
        Value::Map(map) => {
            for v in map.values() {
                collect_value_edges(from, v, kind, call, out);
            }
        }
        Value::Array(a) => {
            for v in a.values() {
                collect_value_edges(from, v, kind, call, out);
            }
        }
        Value::Condition(c) => {
            for v in c.values() {
                collect_value_edges(from, v, kind, call, out);
            }
        }
        Value::Parameter(p) => collect_value_edges(from, p.default_value(), kind, call, out),
        Value::Inline(inner) => {
            // Inline определение строится вместе с владельцем: его method call'ы
            // наследуют вид слота, в котором оно лежит
            for v in inner.all_values() {
                collect_value_edges(from, v, kind, call, out);
            }
        }
        Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::Tagged(_) => {}
    }
}

/// Граф зависимостей: от определения -> к определениям
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Прямой граф
    graph: BTreeMap<String, Vec<Edge>>,
    /// Обратный граф: к определению <- от определений
    reverse_graph: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Построить граф по набору определений
    pub fn from_definitions<'a>(definitions: impl IntoIterator<Item = &'a Definition>) -> Self {
        let mut graph = Self::new();
        for def in definitions {
            graph.graph.entry(def.id().to_string()).or_default();
            for edge in definition_edges(def) {
                graph.add_edge(edge);
            }
        }
        graph
    }

    /// Добавить ребро
    pub fn add_edge(&mut self, edge: Edge) {
        debug!("🔗 Добавлена зависимость: {} -> {}", edge.from, edge.to);
        self.reverse_graph
            .entry(edge.to.clone())
            .or_default()
            .push(edge.from.clone());
        self.graph.entry(edge.from.clone()).or_default().push(edge);
    }

    /// Исходящие рёбра определения
    pub fn edges(&self, id: &str) -> &[Edge] {
        self.graph.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Все определения, которые зависят от данного
    pub fn dependents(&self, id: &str) -> &[String] {
        self.reverse_graph
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.graph.keys().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.values().map(Vec::len).sum()
    }

    /// Всё, что достижимо из `roots` по любым рёбрам (включая сами корни)
    pub fn reachable_from<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = roots.into_iter().map(str::to_string).collect();

        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for edge in self.edges(&id) {
                if !seen.contains(&edge.to) {
                    stack.push(edge.to.clone());
                }
            }
        }

        seen
    }

    /// Лежит ли `id` на каком-либо цикле (по любым рёбрам)
    pub fn is_on_cycle(&self, id: &str) -> bool {
        let starts = self.edges(id).iter().map(|e| e.to.as_str());
        self.reachable_from(starts).contains(id)
    }

    /// Получить статистику графа
    pub fn get_stats(&self) -> GraphStats {
        let total_definitions = self.node_count();
        let total_edges = self.edge_count();
        let hard_edges = self
            .graph
            .values()
            .flatten()
            .filter(|e| e.is_hard())
            .count();

        let average_fan_out = if total_definitions > 0 {
            total_edges as f64 / total_definitions as f64
        } else {
            0.0
        };

        let mut max_fan_out = 0;
        let mut max_fan_in = 0;
        let mut most_dependent = None;
        let mut most_depended_upon = None;

        for id in self.graph.keys() {
            let outgoing = self.edges(id).len();
            let incoming = self.dependents(id).len();

            if outgoing > max_fan_out {
                max_fan_out = outgoing;
                most_dependent = Some(id.clone());
            }
            if incoming > max_fan_in {
                max_fan_in = incoming;
                most_depended_upon = Some(id.clone());
            }
        }

        GraphStats {
            total_definitions,
            total_edges,
            hard_edges,
            deferred_edges: total_edges - hard_edges,
            average_fan_out,
            max_fan_out,
            max_fan_in,
            most_dependent,
            most_depended_upon,
        }
    }

    /// Получить текстовый отчёт о графе
    pub fn get_dependency_report(&self) -> String {
        let stats = self.get_stats();
        format!(
            "=== Dependency Graph Report ===\n\
             Total definitions: {}\n\
             Total edges: {} ({} hard, {} deferred)\n\
             Average fan-out: {:.2}\n\
             Max fan-out: {}\n\
             Max fan-in: {}\n\
             Most dependent definition: {}\n\
             Most depended upon definition: {}\n\
             =============================",
            stats.total_definitions,
            stats.total_edges,
            stats.hard_edges,
            stats.deferred_edges,
            stats.average_fan_out,
            stats.max_fan_out,
            stats.max_fan_in,
            stats.most_dependent.as_deref().unwrap_or("None"),
            stats.most_depended_upon.as_deref().unwrap_or("None"),
        )
    }
}

/// Статистика графа зависимостей
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub total_definitions: usize,
    pub total_edges: usize,
    pub hard_edges: usize,
    pub deferred_edges: usize,
    pub average_fan_out: f64,
    pub max_fan_out: usize,
    pub max_fan_in: usize,
    pub most_dependent: Option<String>,
    pub most_depended_upon: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::{ClosureArgument, IteratorArgument};
    use crate::reference::Reference;

    fn def(id: &str, args: Vec<Value>) -> Definition {
        let mut d = Definition::new(id);
        d.set_arguments(args);
        d
    }

    #[test]
    fn test_edge_kinds() {
        let mut a = def(
            "a",
            vec![
                Value::reference("b"),
                Value::Closure(ClosureArgument::new(Reference::new("c"))),
                Value::Iterator(IteratorArgument::new(vec![Value::reference("d")])),
            ],
        );
        a.add_method_call("setE", vec![Value::reference("e")]);

        let edges = definition_edges(&a);
        let kinds: Vec<(&str, EdgeKind)> =
            edges.iter().map(|e| (e.to.as_str(), e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("b", EdgeKind::Constructor),
                ("c", EdgeKind::Deferred),
                ("d", EdgeKind::Deferred),
                ("e", EdgeKind::MethodCall),
            ]
        );
        assert_eq!(edges[3].call, Some(0));
        assert!(edges[0].is_hard());
        assert!(!edges[1].is_hard());
    }

    #[test]
    fn test_inline_edges_attributed_to_owner() {
        let mut inner = Definition::new("inner");
        inner.add_method_call("setX", vec![Value::reference("x")]);
        let outer = def("outer", vec![Value::Inline(Box::new(inner))]);

        let edges = definition_edges(&outer);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "outer");
        assert_eq!(edges[0].kind, EdgeKind::Constructor);
        assert_eq!(edges[0].call, None);
    }

    #[test]
    fn test_graph_stats() {
        let defs = vec![
            def("a", vec![Value::reference("c")]),
            def("b", vec![Value::reference("c")]),
            def("c", vec![]),
        ];
        let graph = DependencyGraph::from_definitions(&defs);
        let stats = graph.get_stats();

        assert_eq!(stats.total_definitions, 3);
        assert_eq!(stats.total_edges, 2);
        assert_eq!(stats.max_fan_in, 2);
        assert_eq!(stats.most_depended_upon.as_deref(), Some("c"));
        assert!(graph.get_dependency_report().contains("Total definitions: 3"));
    }

    #[test]
    fn test_reachability_and_cycles() {
        let defs = vec![
            def("a", vec![Value::reference("b")]),
            def("b", vec![Value::reference("a")]),
            def("c", vec![Value::reference("a")]),
        ];
        let graph = DependencyGraph::from_definitions(&defs);

        assert!(graph.is_on_cycle("a"));
        assert!(!graph.is_on_cycle("c"));
        let reachable = graph.reachable_from(["c"]);
        assert_eq!(reachable.len(), 3);
    }
}
