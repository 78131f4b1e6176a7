// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Intake scenarios: OpenSSH-style files, includes, hints and YAML.

use std::io::Write;

use wishlist::config::{apply_hints, loader, ssh_config, Endpoint, EndpointHint};

#[test]
fn ssh_config_include_merges_identity_files_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let included = dir.path().join("1.included");
    let mut f = std::fs::File::create(&included).unwrap();
    writeln!(f, "Host test.foo.bar").unwrap();
    writeln!(f, "  IdentityFile ~/.ssh/id_rsa2").unwrap();

    let main_path = dir.path().join("config");
    let mut f = std::fs::File::create(&main_path).unwrap();
    writeln!(f, "Host test.foo.bar").unwrap();
    writeln!(f, "  Include {}", included.display()).unwrap();
    writeln!(f, "  IdentityFile ~/.ssh/other_id").unwrap();

    let endpoints = ssh_config::parse_file(&main_path, &[]).unwrap();
    let endpoint = endpoints
        .iter()
        .find(|e| e.name == "test.foo.bar")
        .expect("endpoint parsed");
    assert_eq!(
        endpoint.identity_files,
        ["~/.ssh/id_rsa2", "~/.ssh/other_id"]
    );
}

#[test]
fn hint_overlay_rewrites_port_user_and_appends_lists() {
    let discovered = vec![Endpoint {
        name: "db-01".to_string(),
        address: "db-01:22".to_string(),
        ..Default::default()
    }];
    let hints = vec![EndpointHint {
        match_pattern: "db-*".to_string(),
        port: "2222".to_string(),
        user: "ops".to_string(),
        send_env: vec!["FOO".to_string()],
        ..Default::default()
    }];

    let result = apply_hints(discovered, &hints);
    assert_eq!(result[0].name, "db-01");
    assert_eq!(result[0].address, "db-01:2222");
    assert_eq!(result[0].user, "ops");
    assert_eq!(result[0].send_env, ["FOO"]);
}

#[test]
fn yaml_config_seeds_get_hints_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wishlist.yaml");
    std::fs::write(
        &path,
        "endpoints:\n  - name: static\n    address: static:22\nhints:\n  - match: \"db-*\"\n    user: ops\n",
    )
    .unwrap();

    let seed = vec![Endpoint {
        name: "db-01".to_string(),
        address: "db-01:22".to_string(),
        ..Default::default()
    }];
    let (config, used) = loader::load(Some(&path), &seed).unwrap();
    assert_eq!(used, path);

    let db = config.endpoints.iter().find(|e| e.name == "db-01").unwrap();
    assert_eq!(db.user, "ops");
    assert!(config.endpoints.iter().any(|e| e.name == "static"));
}

#[test]
fn wildcards_fold_into_matching_hosts() {
    let content = "\
Host *
  SendEnv GLOBAL
Host *.prod
  User deploy
Host web.prod
  Hostname web.internal
Host db.dev
  Port 2200
";
    let endpoints = ssh_config::parse_str(content, &[]).unwrap();

    let web = endpoints.iter().find(|e| e.name == "web.prod").unwrap();
    assert_eq!(web.user, "deploy");
    assert_eq!(web.send_env, ["GLOBAL"]);
    assert_eq!(web.address, "web.internal:22");

    let db = endpoints.iter().find(|e| e.name == "db.dev").unwrap();
    assert_eq!(db.user, "");
    assert_eq!(db.send_env, ["GLOBAL"]);
    assert_eq!(db.address, "db.dev:2200");
}
