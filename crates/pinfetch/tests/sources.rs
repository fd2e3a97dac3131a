mod common;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use common::{RecordingSleeper, StubResponse, StubServer, service};
use pinfetch::{Error, ErrorKind, GitAnchorType, SourceSetup};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn write_jar(dir: &Path) -> PathBuf {
    let path = dir.join("resources.jar");
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    zip.start_file("sample", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"a").unwrap();
    zip.start_file("versions.properties", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"guava=33.0\n").unwrap();
    zip.finish().unwrap();
    path
}

#[test]
fn test_bitbucket_cloud_tag_resolves_to_hash() {
    let server = StubServer::start();
    server.route(
        "/testOrg/testRepo/refs/tags/testAnchor",
        [StubResponse::ok(r#"{"name":"testAnchor","target":{"hash":"9f2c1e"}}"#)],
    );
    server.route(
        "/testOrg/testRepo/src/9f2c1e/src/main/resources/test.properties",
        [StubResponse::ok("key=value\n")],
    );
    server.route(
        "/testOrg/testRepo/src/9f2c1e/src/main/resources/other.txt",
        [StubResponse::ok("other")],
    );
    let dir = TempDir::new().unwrap();
    let pinfetch = service(&dir.path().join("cache"), &RecordingSleeper::default());
    let bitbucket = SourceSetup::new(dir.path())
        .bitbucket("testOrg/testRepo", GitAnchorType::Tag, "testAnchor")
        .unwrap()
        .custom_domain_http(server.host())
        .cloud_auth("un:pw");
    pinfetch.set_source(bitbucket).unwrap();

    assert_eq!(pinfetch.prop("test", "key").unwrap(), "value");
    let other = pinfetch.file("other.txt").unwrap();
    assert_eq!(fs::read_to_string(other).unwrap(), "other");

    // The tag is looked up once, with credentials.
    assert_eq!(server.hits("/testOrg/testRepo/refs/tags/testAnchor"), 1);
    assert_eq!(
        server.authorization("/testOrg/testRepo/refs/tags/testAnchor"),
        vec![Some("Basic dW46cHc=".to_string())]
    );
}

#[test]
fn test_bitbucket_tree_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let setup = SourceSetup::new(dir.path());
    for server_layout in [false, true] {
        let pinfetch = service(&dir.path().join("cache"), &RecordingSleeper::default());
        let bitbucket = setup
            .bitbucket("testOrg/testRepo", GitAnchorType::Tree, "testAnchor")
            .unwrap();
        let bitbucket = if server_layout {
            bitbucket.server()
        } else {
            bitbucket
        };
        pinfetch.set_source(bitbucket).unwrap();

        let err = pinfetch.file("test.properties").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.to_string(), "TREE not supported for Bitbucket");
    }
}

#[test]
fn test_gitlab_custom_domain_with_token() {
    let server = StubServer::start();
    let target = "/api/v4/projects/group%2Fproject/repository/files/src%2Fmain%2Fresources%2Fversions.properties/raw?ref=v1";
    server.route(target, [StubResponse::ok("spotless=6.25\n")]);
    let dir = TempDir::new().unwrap();
    let pinfetch = service(dir.path(), &RecordingSleeper::default());
    let gitlab = SourceSetup::new(dir.path())
        .gitlab("group/project", GitAnchorType::Tag, "v1")
        .unwrap()
        .custom_domain_http(server.host())
        .auth_token("glpat");
    pinfetch.set_source(gitlab).unwrap();

    assert_eq!(pinfetch.prop("versions", "spotless").unwrap(), "6.25");
    assert_eq!(pinfetch.prop("versions", "spotless").unwrap(), "6.25");
    assert_eq!(server.hits(target), 1);
    assert_eq!(
        server.authorization(target),
        vec![Some("Bearer glpat".to_string())]
    );
}

#[test]
fn test_local_jar_through_cache() {
    let dir = TempDir::new().unwrap();
    let jar = write_jar(dir.path());
    let pinfetch = service(&dir.path().join("cache"), &RecordingSleeper::default());
    pinfetch
        .set_source(SourceSetup::new(dir.path()).local_jar(&jar).unwrap())
        .unwrap();

    let sample = pinfetch.file("sample").unwrap();
    assert!(sample.starts_with(dir.path().join("cache")));
    assert_eq!(fs::read_to_string(&sample).unwrap(), "a");
    assert_eq!(pinfetch.prop("versions", "guava").unwrap(), "33.0");

    let err = pinfetch.file("absent.txt").unwrap_err();
    assert!(matches!(err, Error::EntryNotFound { ref entry, .. } if entry == "absent.txt"));
}

#[test]
fn test_local_jar_with_suffix() {
    let dir = TempDir::new().unwrap();
    let jar = write_jar(dir.path());
    let pinfetch = service(&dir.path().join("cache"), &RecordingSleeper::default());

    let url = format!("file:///{}!/sample", jar.display());
    let a = pinfetch.immutable_url_with_suffix(&url, Some(".suffix")).unwrap();
    let b = pinfetch.immutable_url_with_suffix(&url, Some(".suffix2")).unwrap();
    assert!(a.to_string_lossy().ends_with(".suffix"));
    assert!(b.to_string_lossy().ends_with(".suffix2"));
}

#[test]
fn test_source_can_only_be_set_once() {
    let dir = TempDir::new().unwrap();
    let pinfetch = service(dir.path(), &RecordingSleeper::default());
    let setup = SourceSetup::new(dir.path());
    pinfetch
        .set_source(setup.gitlab("group/project", GitAnchorType::Tag, "v1").unwrap())
        .unwrap();

    let err = pinfetch
        .set_source(setup.github("org/repo", GitAnchorType::Tag, "v1").unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyInitialized));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
