// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::bail;
use ferry_kernel::selector::{all_selector, entries_selector, selector_cid, SelectorNode};

/// Looks up one of the named built-in selectors.
pub fn named(name: &str) -> anyhow::Result<SelectorNode> {
    match name {
        "all" => Ok(all_selector()),
        "entries" => Ok(entries_selector()),
        other => bail!("unknown selector {other:?} (expected \"all\" or \"entries\")"),
    }
}

/// Hex dag-cbor encoding and CID of a named selector.
pub fn describe(name: &str) -> anyhow::Result<(String, String)> {
    let node = named(name)?;
    Ok((hex::encode(node.to_bytes()?), selector_cid(&node)?.to_string()))
}

pub fn run(name: &str) -> anyhow::Result<()> {
    let (encoded, cid) = describe(name)?;
    println!("selector: {name}");
    println!("dag-cbor: {encoded}");
    println!("cid:      {cid}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_selectors_round_trip() {
        for name in ["all", "entries"] {
            let (encoded, cid) = describe(name).unwrap();
            let bytes = hex::decode(&encoded).unwrap();
            assert_eq!(SelectorNode::from_bytes(&bytes).unwrap(), named(name).unwrap());
            assert!(cid.starts_with('b'));
        }
    }

    #[test]
    fn test_unknown_selector() {
        assert!(named("everything").is_err());
    }
}
