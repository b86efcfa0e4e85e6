// Human-readable invocation summaries
//
// Non-normative rendering of a journaled call tree: one line per call
// with its input and outcome, children indented beneath their parent.

use std::fmt::Write;

use crate::error::Result;
use crate::invocation::fns::FnInvokable;
use crate::invocation::Invocation;
use crate::resource::Resource;
use crate::store::Store;
use crate::value::ResourceDict;

/// Render the call tree of an invocation.
pub fn summary(invocation: &Invocation) -> Result<String> {
    let store = Store::current()?;
    let mut out = String::new();
    render(&store, invocation, 0, &mut out)?;
    Ok(out)
}

fn render(store: &Store, invocation: &Invocation, depth: usize, out: &mut String) -> Result<()> {
    let request = invocation.request.checkout_in(store)?;
    let invokable = store.checkout_dict(&request.invokable.digest())?;
    let input = request.input.checkout_in(store)?.wrapped;
    let response = invocation.response.checkout_in(store)?;

    let indent = "  ".repeat(depth);
    write!(out, "{}{}({})", indent, display_name(&invokable), input)
        .expect("writing to string cannot fail");

    if let Some(output) = &response.output {
        let value = output.checkout_in(store)?.wrapped;
        writeln!(out, " -> {}", value).expect("writing to string cannot fail");
    } else if let Some(raised) = &response.raised {
        let condition = store.checkout_dict(&raised.digest())?;
        let origin = if response.raised_here { "" } else { " (propagated)" };
        writeln!(out, " !! {}{}", condition, origin).expect("writing to string cannot fail");
    } else {
        writeln!(out, " -> <incomplete>").expect("writing to string cannot fail");
    }

    for child in &response.children {
        render(store, &child.checkout_in(store)?, depth + 1, out)?;
    }
    Ok(())
}

/// A call's display name: the invokable's type name, or the function name
/// for registered free functions.
fn display_name(invokable: &ResourceDict) -> String {
    if invokable.type_key() == &FnInvokable::type_key() {
        if let Ok(f) = FnInvokable::from_dict(invokable.clone()) {
            return f.name;
        }
    }
    invokable.type_key().name.clone()
}
