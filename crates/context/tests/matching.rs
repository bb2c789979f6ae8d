use strata_context::{find_context, ContextInput, ContextSet};

fn solc_metadata(fill: &str) -> String {
    format!("a2646970667358221220{}64736f6c63430008140033", fill.repeat(32))
}

fn runtime(fill: &str) -> String {
    format!("0x6080604052348015600f57600080fd5b50fe{}", solc_metadata(fill))
}

#[test]
fn only_metadata_hash_differs() {
    let inputs: Vec<ContextInput> = serde_json::from_str(&format!(
        r#"[
            {{ "binary": "{}", "contractName": "Token", "contractId": 1, "linearizedBaseContracts": [1] }},
            {{ "binary": "0x6080604052600080fd", "contractName": "Other", "contractId": 2 }}
        ]"#,
        runtime("aa")
    ))
    .unwrap();
    let set = ContextSet::new(inputs);

    let deployed = runtime("bb");
    let found = set.find(&deployed).unwrap();
    assert_eq!(found.contract_name, "Token");
    let upper = find_context(set.iter(), &deployed.to_uppercase()).unwrap();
    assert_eq!(upper.context_hash, found.context_hash);

    let truncated = &deployed[..deployed.len() - 2];
    assert!(set.find(truncated).is_none());
}

#[test]
fn linked_library_matches_placeholder() {
    let placeholder = format!("__SafeMath{}", "_".repeat(30));
    let set = ContextSet::new(vec![ContextInput {
        binary: format!("0x73{placeholder}5af4"),
        contract_name: "Vault".into(),
        link_libraries: vec!["SafeMath".into()],
        ..ContextInput::default()
    }]);
    let linked = format!("0x73{}5af4", "de".repeat(20));
    assert_eq!(set.find(&linked).map(|c| c.contract_name.as_str()), Some("Vault"));
}
