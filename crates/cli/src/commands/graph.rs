//! `concierge graph` — Print the behavioral transition graph.

use concierge_agent::TransitionGraph;
use concierge_core::state::BehaviorState;

pub fn run(dot: bool) -> anyhow::Result<()> {
    let graph = TransitionGraph::builtin();
    if dot {
        print!("{}", render_dot(&graph));
    } else {
        print!("{}", render_table(&graph));
    }
    Ok(())
}

fn render_table(graph: &TransitionGraph) -> String {
    let mut out = String::new();
    for state in BehaviorState::ALL {
        let targets: Vec<&str> = graph.neighbors(state).iter().map(|s| s.as_str()).collect();
        let guard = graph
            .guard(state)
            .map(|g| g.description.as_str())
            .unwrap_or("(explicit only)");
        out.push_str(&format!(
            "{:<10} -> {:<40} entry: {guard}\n",
            state.as_str(),
            targets.join(", ")
        ));
    }
    out
}

fn render_dot(graph: &TransitionGraph) -> String {
    let mut out = String::from("digraph concierge {\n");
    for state in BehaviorState::ALL {
        for to in graph.neighbors(state) {
            out.push_str(&format!("    {} -> {};\n", state.as_str(), to.as_str()));
        }
    }
    out.push_str("}\n");
    out
}
