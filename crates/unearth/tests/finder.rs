//! End-to-end finder scenarios over file:// fixtures, so the suite runs
//! without network access.

use std::path::Path;
use std::str::FromStr;

use unearth::{
    download_and_unpack, FindLinks, LinkMismatch, PackageFinder, Requirement, Session,
    TargetPython, VcsKind,
};
use url::Url;

/// Writes `{root}/{project}/index.html` with the given anchor lines and
/// returns the `file://` index URL (the directory above the project pages).
fn build_html_index(root: &Path, project: &str, anchors: &[String]) -> Url {
    let project_dir = root.join(project);
    fs_err::create_dir_all(&project_dir).unwrap();
    let body = format!(
        "<html><body>\n{}\n</body></html>",
        anchors.join("\n")
    );
    fs_err::write(project_dir.join("index.html"), body).unwrap();
    Url::from_directory_path(root).unwrap()
}

fn anchor(href: &str, attrs: &str) -> String {
    format!("<a href=\"{href}\" {attrs}>link</a>")
}

fn target_310() -> TargetPython {
    TargetPython::new(3, 10, vec!["any".to_string()])
}

#[tokio::test]
async fn test_html_index_best_match() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();
    let index_url = build_html_index(
        &root,
        "flask",
        &[
            anchor(
                "https://files.example.com/Flask-2.1.2-py3-none-any.whl#sha256=fad5b446feb0d6d6f95297c2b8aba34d7cd3250a8fd0e80647726ac787fe04fe",
                "",
            ),
            anchor("https://files.example.com/Flask-1.1.4-py2.py3-none-any.whl", ""),
        ],
    );

    let mut finder =
        PackageFinder::new(Session::new().unwrap()).with_target_python(target_310());
    finder.add_index_url(index_url);

    let requirement = Requirement::from_str("flask>=2").unwrap();
    let result = finder.find_best_match(&requirement, None).await.unwrap();

    let best = result.best.expect("a match should be found");
    assert_eq!(best.name.as_str(), "flask");
    assert_eq!(best.version, Some("2.1.2".parse().unwrap()));
    assert!(best
        .link
        .url
        .as_str()
        .starts_with("https://files.example.com/Flask-2.1.2-py3-none-any.whl"));
    assert!(best.link.hashes.unwrap().sha256.is_some());
}

#[tokio::test]
async fn test_json_index_best_match() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();
    let project_dir = root.join("flask");
    fs_err::create_dir_all(&project_dir).unwrap();
    fs_err::write(
        project_dir.join("index.json"),
        r#"{
            "meta": {"api-version": "1.0"},
            "files": [
                {
                    "url": "https://files.example.com/Flask-2.1.2-py3-none-any.whl",
                    "hashes": {"sha256": "fad5b446feb0d6d6f95297c2b8aba34d7cd3250a8fd0e80647726ac787fe04fe"},
                    "requires-python": ">=3.7",
                    "yanked": false
                },
                {
                    "url": "https://files.example.com/Flask-2.2.0-py3-none-any.whl",
                    "yanked": "broken metadata"
                }
            ]
        }"#,
    )
    .unwrap();

    let mut finder =
        PackageFinder::new(Session::new().unwrap()).with_target_python(target_310());
    finder.add_index_url(Url::from_directory_path(&root).unwrap());

    let requirement = Requirement::from_str("flask").unwrap();
    let result = finder.find_best_match(&requirement, None).await.unwrap();

    // 2.2.0 is yanked and the requirement is not pinned, so 2.1.2 wins.
    let best = result.best.expect("a match should be found");
    assert_eq!(best.version, Some("2.1.2".parse().unwrap()));
    assert_eq!(best.link.requires_python.as_deref(), Some(">=3.7"));
}

#[tokio::test]
async fn test_no_wheel_matches_target_tags() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();
    let index_url = build_html_index(
        &root,
        "foo",
        &[anchor(
            "https://files.example.com/Foo-1.0-cp39-cp39-manylinux1_x86_64.whl",
            "",
        )],
    );

    let mut finder = PackageFinder::new(Session::new().unwrap()).with_target_python(
        TargetPython::new(3, 10, vec!["macosx_11_0_arm64".to_string()]),
    );
    finder.add_index_url(index_url);

    let requirement = Requirement::from_str("foo").unwrap();
    let result = finder.find_best_match(&requirement, None).await.unwrap();

    assert!(result.best.is_none());
    assert!(result
        .rejections
        .iter()
        .any(|r| matches!(r.reason, LinkMismatch::IncompatibleTags { .. })));
    let reason = result.failure_reason().unwrap();
    assert!(reason.contains("rejected"), "unexpected reason: {reason}");
}

#[tokio::test]
async fn test_index_order_decides_ties() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();
    let first = build_html_index(
        &root.join("first"),
        "bar",
        &[anchor("https://first.example.com/bar-1.0.tar.gz", "")],
    );
    let second = build_html_index(
        &root.join("second"),
        "bar",
        &[anchor("https://second.example.com/bar-1.0.tar.gz", "")],
    );

    let requirement = Requirement::from_str("bar").unwrap();

    let mut finder = PackageFinder::new(Session::new().unwrap()).with_target_python(target_310());
    finder.add_index_url(first.clone());
    finder.add_index_url(second.clone());
    let result = finder.find_best_match(&requirement, None).await.unwrap();
    assert_eq!(
        result.best.unwrap().link.url.host_str(),
        Some("first.example.com")
    );
    assert_eq!(result.applicable.len(), 2);

    // Swapping the index order swaps the winner.
    let mut swapped = PackageFinder::new(Session::new().unwrap()).with_target_python(target_310());
    swapped.add_index_url(second);
    swapped.add_index_url(first);
    let result = swapped.find_best_match(&requirement, None).await.unwrap();
    assert_eq!(
        result.best.unwrap().link.url.host_str(),
        Some("second.example.com")
    );
}

#[tokio::test]
async fn test_url_requirement_download_and_unpack() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();

    // A source archive with the usual single top-level directory.
    let archive_path = root.join("pip-23.0.zip");
    let file = fs_err::File::create(&archive_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    writer.start_file("pip-23.0/setup.py", options).unwrap();
    writer.write_all(b"# setup").unwrap();
    writer.finish().unwrap();

    let url = Url::from_file_path(&archive_path).unwrap();
    let requirement = Requirement::from_str(&format!("pip @ {url}")).unwrap();

    let finder = PackageFinder::new(Session::new().unwrap());
    let result = finder.find_best_match(&requirement, None).await.unwrap();
    let best = result.best.expect("the direct link is the match");
    assert_eq!(best.name.as_str(), "pip");
    assert_eq!(best.version, None);

    let location = root.join("src");
    let unpacked = download_and_unpack(finder.session(), &best.link, &location, None, None)
        .await
        .unwrap();
    assert_eq!(unpacked.path, location);
    assert!(location.join("setup.py").is_file());
}

#[tokio::test]
async fn test_find_links_directory_with_hash_check() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();
    fs_err::write(root.join("pkg-1.0.tar.gz"), b"payload").unwrap();

    let mut finder =
        PackageFinder::new(Session::new().unwrap()).with_target_python(target_310());
    finder.add_find_links(FindLinks::Path(root.clone()));

    let requirement = Requirement::from_str("pkg").unwrap();

    let payload_digest = hex::encode(rattler_digest::compute_bytes_digest::<
        rattler_digest::Sha256,
    >(b"payload"));
    let mut allowed = unearth::HashAllowList::default();
    allowed.add(unearth::HashAlgorithm::Sha256, payload_digest);
    let result = finder
        .find_best_match(&requirement, Some(&allowed))
        .await
        .unwrap();
    assert!(result.best.is_some());

    let mut wrong = unearth::HashAllowList::default();
    wrong.add(
        unearth::HashAlgorithm::Sha256,
        "0000000000000000000000000000000000000000000000000000000000000000",
    );
    let result = finder
        .find_best_match(&requirement, Some(&wrong))
        .await
        .unwrap();
    assert!(result.best.is_none());
}

#[tokio::test]
async fn test_vcs_requirement_checkout() {
    // Silently skipped when no git client is available.
    if std::process::Command::new("git")
        .arg("version")
        .output()
        .map(|o| !o.status.success())
        .unwrap_or(true)
    {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();
    let repo = root.join("demo");
    fs_err::create_dir(&repo).unwrap();
    let git = |args: &[&str]| {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(&repo)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?} failed");
    };
    git(&["init", "-q"]);
    git(&["config", "user.email", "test@example.com"]);
    git(&["config", "user.name", "test"]);
    fs_err::write(repo.join("pyproject.toml"), b"[project]\nname = \"demo\"\n").unwrap();
    git(&["add", "."]);
    git(&["commit", "-q", "-m", "initial"]);
    git(&["tag", "v1.0"]);

    let repo_url = Url::from_file_path(&repo).unwrap();
    let requirement =
        Requirement::from_str(&format!("demo @ git+{repo_url}@v1.0")).unwrap();
    let Requirement::Vcs(ref vcs) = requirement else {
        panic!("expected a VCS requirement");
    };
    assert_eq!(vcs.vcs, VcsKind::Git);
    assert_eq!(vcs.rev.as_deref(), Some("v1.0"));

    let finder = PackageFinder::new(Session::new().unwrap());
    let result = finder.find_best_match(&requirement, None).await.unwrap();
    let best = result.best.expect("the VCS link is the match");
    assert_eq!(best.version, None);

    let location = root.join("checkout");
    let unpacked = download_and_unpack(finder.session(), &best.link, &location, None, None)
        .await
        .unwrap();
    assert_eq!(unpacked.path, location);
    let revision = unpacked.revision.expect("a resolved revision is reported");
    assert_eq!(revision.len(), 40);
    assert!(location.join("pyproject.toml").is_file());
}

#[tokio::test]
async fn test_download_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();

    // Build a tiny wheel next to an index page that links to it.
    let project_dir = root.join("index").join("pkg");
    fs_err::create_dir_all(&project_dir).unwrap();
    let wheel_path = project_dir.join("pkg-1.0-py3-none-any.whl");
    let file = fs_err::File::create(&wheel_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("pkg/__init__.py", zip::write::FileOptions::default())
        .unwrap();
    writer.finish().unwrap();
    fs_err::write(
        project_dir.join("index.html"),
        r#"<html><body><a href="pkg-1.0-py3-none-any.whl">pkg</a></body></html>"#,
    )
    .unwrap();

    let mut finder =
        PackageFinder::new(Session::new().unwrap()).with_target_python(target_310());
    finder.add_index_url(Url::from_directory_path(root.join("index")).unwrap());

    let requirement = Requirement::from_str("pkg").unwrap();
    let result = finder.find_best_match(&requirement, None).await.unwrap();
    let best = result.best.expect("the local wheel should match");

    // Local wheels are used in place, not copied into the destination.
    let location = root.join("dest");
    let unpacked = download_and_unpack(finder.session(), &best.link, &location, None, None)
        .await
        .unwrap();
    assert_eq!(unpacked.path, wheel_path);
}

#[tokio::test]
async fn test_nonexistent_paths_and_projects() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs_err::canonicalize(dir.path()).unwrap();
    // Index exists but has no page for the project: the single source fails
    // and the finder reports it rather than returning an empty result.
    let _ = build_html_index(&root, "other", &[]);

    let mut finder =
        PackageFinder::new(Session::new().unwrap()).with_target_python(target_310());
    finder.add_index_url(Url::from_directory_path(&root).unwrap());

    let requirement = Requirement::from_str("missing").unwrap();
    let result = finder.find_best_match(&requirement, None).await;
    assert!(result.is_err());
}
