//! Metadata queries against mocked package tools

use super::{local_settings, MockQueryRunner};
use apt_batch::{PackageMetadataService, Settings};
use std::time::Instant;

const SHOW_OUTPUT: &str = "Package: vim
Version: 2:9.0.1378-2
Priority: optional
Section: editors
Maintainer: Debian Vim Maintainers <team+vim@tracker.debian.org>
Installed-Size: 3868
Depends: vim-common (= 2:9.0.1378-2), vim-runtime (= 2:9.0.1378-2), libacl1 (>= 2.2.23), libc6 (>= 2.34)
Suggests: ctags, vim-doc, vim-scripts
Provides: editor
Homepage: https://www.vim.org/
Description-en: Vi IMproved - enhanced vi editor
 Vim is an almost compatible version of the UNIX editor Vi.
 .
 Many new features have been added: multi level undo, syntax
 highlighting, command line history, on-line help, filename
 completion, block operations, folding, Unicode support, etc.
Description-md5: 59e8b8f7757db8b53566d5d119872de8

Package: vim
Version: 2:9.0.1378-1
Description-en: no maintainer here

";

#[tokio::test]
async fn test_show_parses_valid_stanzas_and_skips_broken_ones() {
    let runner = MockQueryRunner::new().with_output("apt-cache show vim", SHOW_OUTPUT);
    let metadata = PackageMetadataService::new(runner, &Settings::default());

    let outcome = metadata.show("vim").await.unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.skipped.len(), 1);

    let vim = &outcome.records[0];
    assert_eq!(vim.version.epoch, Some(2));
    assert_eq!(vim.version.upstream, "9.0.1378");
    assert_eq!(vim.version.revision.as_deref(), Some("2"));
    assert_eq!(vim.maintainer.email, "team+vim@tracker.debian.org");
    assert_eq!(vim.section.as_deref(), Some("editors"));
    assert_eq!(vim.installed_size, Some(3868));
    assert_eq!(vim.provides.as_deref(), Some("editor"));
    assert!(vim.description.starts_with("Vi IMproved - enhanced vi editor.\nVim is"));
    assert!(vim.description.contains("\n\nMany new features"));
}

#[tokio::test]
async fn test_query_errors_propagate() {
    let runner = MockQueryRunner::new().with_error(
        "apt-cache search --names-only vim",
        "E: The package cache file is corrupted",
    );
    let metadata = PackageMetadataService::new(runner, &Settings::default());

    let err = metadata.search_previews("vim").await.unwrap_err();
    assert!(err.to_string().contains("corrupted"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_status_queries_run_concurrently() {
    let runner = MockQueryRunner::new()
        .with_output("dpkg-query -W a", "a\t1.0\n")
        .with_output("dpkg-query -W b", "b\t1.0\n")
        .with_output("dpkg-query -W c", "c\t1.0\n")
        .with_delay(100);
    let metadata = PackageMetadataService::new(runner, &Settings::default());

    let start = Instant::now();
    let (a, b, c) = tokio::join!(
        metadata.status("a"),
        metadata.status("b"),
        metadata.status("c")
    );
    let elapsed = start.elapsed();

    assert!(a && b && c);
    assert!(
        elapsed.as_millis() < 250,
        "status queries should overlap, took {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_status_cache_is_shared_between_clones() {
    let runner = MockQueryRunner::new().with_output("dpkg-query -W htop", "htop\t3.2.2-2\n");
    let metadata = PackageMetadataService::new(runner.clone(), &Settings::default());
    let clone = metadata.clone();

    assert!(metadata.status("htop").await);
    assert!(clone.status("htop").await);
    assert_eq!(runner.calls().len(), 1);
}

#[tokio::test]
async fn test_custom_tools_are_used() {
    let mut settings = local_settings("apt");
    settings.cache_tool = "apt-cache-ng".to_string();
    let runner = MockQueryRunner::new()
        .with_output("apt -s -o Debug::NoLocking=true upgrade", "")
        .with_output("apt-cache-ng search --names-only x", "x - y\n");
    let metadata = PackageMetadataService::new(runner.clone(), &settings);

    assert_eq!(metadata.check_updates().await.unwrap(), 0);
    assert_eq!(metadata.search_previews("x").await.unwrap().len(), 1);
    assert_eq!(
        runner.calls(),
        vec![
            "apt -s -o Debug::NoLocking=true upgrade".to_string(),
            "apt-cache-ng search --names-only x".to_string()
        ]
    );
}
