use std::fs;

use datacollective::upload::{expected_parts, upload_dataset_file, UploadOptions};
use datacollective::api::Method;
use proptest::prelude::*;
use sha2::{Digest, Sha256};

mod common;

use common::{byte_body, mock_client, Reply};

fn storage_backend(part_size: u64) -> impl FnMut(&datacollective::api::HttpRequest) -> Reply {
    move |request| match request.method {
        Method::Post if request.url.ends_with("upload/initiate") => Reply::json(
            200,
            serde_json::json!({
                "fileUploadId": "fu",
                "uploadId": "up",
                "partSize": part_size,
            }),
        ),
        Method::Get => {
            let index = common::query_value(request, "chunkIndex").unwrap_or("0").to_string();
            Reply::json(
                200,
                serde_json::json!({"presignedUrl": format!("https://bucket.test/{index}")}),
            )
        }
        Method::Put => {
            let tag = format!("\"{}\"", request.url.rsplit('/').next().unwrap_or_default());
            Reply::status(200).header("ETag", &tag)
        }
        Method::Post => Reply::json(200, serde_json::json!({})),
    }
}

proptest! {
    #![proptest_config(common::proptest_config())]

    #[test]
    fn every_byte_is_sent_once_in_numbered_parts(
        data in proptest::collection::vec(any::<u8>(), 1..3000),
        part_size in 16u64..512,
    ) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("blob.bin");
        fs::write(&path, &data).expect("write file");
        let (client, recorder) = mock_client(storage_backend(part_size));

        let state = upload_dataset_file(
            &client,
            &path,
            "sub",
            "application/octet-stream",
            &UploadOptions::default(),
        )
        .expect("upload");

        let expected = expected_parts(data.len() as u64, part_size).expect("part count");
        let numbers: Vec<u64> = state.parts.iter().map(|part| u64::from(part.part_number)).collect();
        prop_assert_eq!(numbers, (1..=expected).collect::<Vec<_>>());

        let sent: Vec<u8> = recorder.puts().iter().flat_map(byte_body).collect();
        prop_assert_eq!(&sent, &data);
        prop_assert!(recorder
            .puts()
            .iter()
            .all(|put| byte_body(put).len() as u64 <= part_size));

        let checksum = hex::encode(Sha256::digest(&data));
        prop_assert_eq!(state.checksum.as_deref(), Some(checksum.as_str()));
    }
}
