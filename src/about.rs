pub const TREE_EXPLORER_DISPLAY_VERSION: &str = env!("TREE_EXPLORER_DISPLAY_VERSION");
pub const TREE_EXPLORER_BUILD_N: &str = env!("TREE_EXPLORER_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "Tree Explorer {}\nBuild {}\nMetadata labelling and exploration of phylogenetic trees",
        TREE_EXPLORER_DISPLAY_VERSION, TREE_EXPLORER_BUILD_N
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_text_mentions_build() {
        let text = version_cli_text();
        assert!(text.starts_with("Tree Explorer "));
        assert!(text.contains(TREE_EXPLORER_BUILD_N));
    }
}
