use serde_json::json;

mod test_support;
use test_support::{open_workspace, seed, spawn_sidecar, HEADER};

#[test]
fn setup_get_returns_defaults() {
    let mut sc = spawn_sidecar();
    open_workspace(&mut sc, "exambook-setup-defaults");
    let setup = sc.request_ok("setup.get", json!({}));
    assert_eq!(setup["upload"]["sessionTtlSeconds"], 1800);
    assert_eq!(setup["upload"]["autoCreateSchools"], true);
    assert_eq!(setup["upload"]["provisionSchoolLogins"], true);
    assert_eq!(setup["results"]["defaultMaxScore"], 100);
    assert_eq!(setup["results"]["defaultPassScore"], 50);
}

#[test]
fn setup_update_validates_and_persists() {
    let mut sc = spawn_sidecar();
    let workspace = open_workspace(&mut sc, "exambook-setup-update");

    let merged = sc.request_ok(
        "setup.update",
        json!({ "section": "upload", "patch": { "sessionTtlSeconds": 600, "autoCreateRegions": false } }),
    );
    assert_eq!(merged["sessionTtlSeconds"], 600);
    assert_eq!(merged["autoCreateRegions"], false);
    assert_eq!(merged["autoCreateClusters"], true);

    for patch in [
        json!({ "sessionTtlSeconds": 5 }),
        json!({ "autoCreateSchools": "yes" }),
        json!({ "defaultSchoolEmail": "not-an-email" }),
        json!({ "somethingElse": 1 }),
    ] {
        assert_eq!(
            sc.request_err("setup.update", json!({ "section": "upload", "patch": patch })),
            "bad_params"
        );
    }
    assert_eq!(
        sc.request_err(
            "setup.update",
            json!({ "section": "results", "patch": { "defaultMaxScore": 40, "defaultPassScore": 50 } })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.request_err("setup.update", json!({ "section": "grading", "patch": {} })),
        "bad_params"
    );

    // Settings live in the workspace database.
    drop(sc);
    let mut sc = spawn_sidecar();
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = sc.request_ok("setup.get", json!({}));
    assert_eq!(setup["upload"]["sessionTtlSeconds"], 600);
    assert_eq!(setup["upload"]["autoCreateRegions"], false);
}

#[test]
fn disabled_region_creation_leaves_new_regions_unmatched() {
    let mut sc = spawn_sidecar();
    open_workspace(&mut sc, "exambook-setup-policy");
    let seeded = seed(&mut sc);
    sc.request_ok(
        "setup.update",
        json!({ "section": "upload", "patch": { "autoCreateRegions": false } }),
    );

    let csv = format!("{},New School,New Cluster,Region B,,Omar Farouk,70,\n", HEADER);
    let p = sc.request_ok(
        "results.upload.preview",
        json!({ "examYearId": seeded.exam_year_id, "grade": 6, "csvText": csv }),
    );
    assert_eq!(p["summary"]["unmatchedLocationRows"], 1);
    assert_eq!(p["summary"]["newRegionsCount"], 0);
    assert_eq!(p["canConfirm"], false);
}

#[test]
fn upload_size_limit_is_enforced() {
    let mut sc = spawn_sidecar();
    open_workspace(&mut sc, "exambook-setup-size");
    let seeded = seed(&mut sc);
    sc.request_ok(
        "setup.update",
        json!({ "section": "upload", "patch": { "maxUploadBytes": 1024 } }),
    );
    let mut csv = HEADER.to_string();
    while csv.len() <= 1024 {
        csv.push_str("S1,Al Noor,Central,Region A,,Amina Yusuf,85,70\n");
    }
    assert_eq!(
        sc.request_err(
            "results.upload.preview",
            json!({ "examYearId": seeded.exam_year_id, "grade": 6, "csvText": csv })
        ),
        "parse_failed"
    );
}
