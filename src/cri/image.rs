//! The `ImageService` handlers: a read-only store over a flat directory of
//! image blobs.
//!
//! An image is a regular file named `sha256:` followed by its 64-hex-digit
//! checksum; anything else in the directory is transient garbage left by an
//! interrupted download, and is swept once it is old enough. Images are
//! placed in the directory out of band: pulling by URL is not implemented,
//! and pulling by checksum makes no sense, so both are refused.

use std::fs::Metadata;
use std::path::PathBuf;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tonic::{Request, Response, Status};

use crate::api;
use crate::cri::TonicResult;
use crate::error::internal_io;
use crate::log_warn_globally;

/// Non-image files older than this are presumed stale and swept.
const STALE_FILE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// True iff `image_name` names a blob that can live in the image directory.
pub fn is_local_image_name(image_name: &str) -> bool {
    lazy_static! {
        static ref LOCAL_IMAGE_RE: Regex = Regex::new(r"^sha256:[0-9a-f]{64}$").unwrap();
    }
    LOCAL_IMAGE_RE.is_match(image_name)
}

pub struct ImageService {
    image_directory: PathBuf,
}

impl ImageService {
    pub fn new(image_directory: PathBuf) -> Self {
        Self { image_directory }
    }

    pub async fn list_images(
        &self,
        _request: Request<api::ListImagesRequest>,
    ) -> TonicResult<api::ListImagesResponse> {
        // TODO: Respect the filter.
        let entries = std::fs::read_dir(&self.image_directory)
            .map_err(|error| internal_io("image directory", &error))?;
        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| internal_io("image directory", &error))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if is_local_image_name(&name) {
                if !metadata.is_file() {
                    continue;
                }
                images.push(api::Image {
                    id: name,
                    size: metadata.len(),
                    ..Default::default()
                });
            } else if metadata.is_file() && is_stale(&metadata) {
                // Filename doesn't match a supported image name pattern. It
                // is likely a temporary file left by an interrupted image
                // placement; sweep it once it has gone stale.
                if let Err(error) = std::fs::remove_file(entry.path()) {
                    log_warn_globally!("Failed to sweep stale file {name:?}: {error}");
                }
            }
        }
        Ok(Response::new(api::ListImagesResponse { images }))
    }

    pub async fn image_status(
        &self,
        request: Request<api::ImageStatusRequest>,
    ) -> TonicResult<api::ImageStatusResponse> {
        let image_name = request.into_inner().image.unwrap_or_default().image;
        if !is_local_image_name(&image_name) {
            return Err(Status::unimplemented("ImageStatus by URL not implemented"));
        }

        // A missing image is reported as an empty status, not an error.
        let mut response = api::ImageStatusResponse { image: None };
        if let Ok(metadata) = std::fs::metadata(self.image_directory.join(&image_name)) {
            if metadata.is_file() {
                response.image = Some(api::Image {
                    id: image_name,
                    size: metadata.len(),
                    ..Default::default()
                });
            }
        }
        Ok(Response::new(response))
    }

    pub async fn pull_image(
        &self,
        request: Request<api::PullImageRequest>,
    ) -> TonicResult<api::PullImageResponse> {
        let image_name = request.into_inner().image.unwrap_or_default().image;
        if is_local_image_name(&image_name) {
            return Err(Status::invalid_argument(
                "Images can only be pulled by URL, not by checksum. Try placing \
                 the image in the image directory manually.",
            ));
        }
        Err(Status::unimplemented("PullImage by URL not implemented"))
    }

    pub async fn remove_image(
        &self,
        request: Request<api::RemoveImageRequest>,
    ) -> TonicResult<api::RemoveImageResponse> {
        let image_name = request.into_inner().image.unwrap_or_default().image;
        if !is_local_image_name(&image_name) {
            return Err(Status::unimplemented("RemoveImage by URL not implemented"));
        }

        match std::fs::remove_file(self.image_directory.join(&image_name)) {
            Ok(()) => Ok(Response::new(api::RemoveImageResponse {})),
            // Removing an absent image succeeds.
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(Response::new(api::RemoveImageResponse {}))
            }
            Err(error) => Err(internal_io(&image_name, &error)),
        }
    }

    pub async fn image_fs_info(
        &self,
        _request: Request<api::ImageFsInfoRequest>,
    ) -> TonicResult<api::ImageFsInfoResponse> {
        Err(Status::unimplemented("ImageFsInfo not implemented"))
    }
}

fn is_stale(metadata: &Metadata) -> bool {
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_FILE_MAX_AGE)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const IMAGE: &str = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OTHER: &str = "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn service(directory: &TempDir) -> ImageService {
        ImageService::new(directory.path().to_path_buf())
    }

    fn spec(image: &str) -> Option<api::ImageSpec> {
        Some(api::ImageSpec {
            image: String::from(image),
        })
    }

    #[test]
    fn local_image_name_pattern() {
        assert!(is_local_image_name(IMAGE));
        // Wrong length, uppercase hex, missing prefix, or URLs.
        assert!(!is_local_image_name("sha256:abc"));
        assert!(!is_local_image_name(&IMAGE.to_uppercase()));
        assert!(!is_local_image_name(
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        ));
        assert!(!is_local_image_name("https://example.com/image"));
        assert!(!is_local_image_name(&format!("{IMAGE}0")));
    }

    #[tokio::test]
    async fn list_reports_matching_regular_files() {
        let directory = tempfile::tempdir().unwrap();
        std::fs::write(directory.path().join(IMAGE), b"0123456789").unwrap();
        std::fs::write(directory.path().join("download.tmp"), b"partial").unwrap();
        std::fs::create_dir(directory.path().join(OTHER)).unwrap();

        let response = service(&directory)
            .list_images(Request::new(api::ListImagesRequest::default()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.images.len(), 1);
        assert_eq!(response.images[0].id, IMAGE);
        assert_eq!(response.images[0].size, 10);

        // The fresh temporary file was not swept.
        assert!(directory.path().join("download.tmp").exists());
    }

    #[tokio::test]
    async fn list_ignores_the_filter() {
        let directory = tempfile::tempdir().unwrap();
        std::fs::write(directory.path().join(IMAGE), b"x").unwrap();
        std::fs::write(directory.path().join(OTHER), b"y").unwrap();

        let response = service(&directory)
            .list_images(Request::new(api::ListImagesRequest {
                filter: Some(api::ImageFilter { image: spec(OTHER) }),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.images.len(), 2);
    }

    #[tokio::test]
    async fn status_reports_present_and_absent_images() {
        let directory = tempfile::tempdir().unwrap();
        std::fs::write(directory.path().join(IMAGE), b"blob").unwrap();
        let service = service(&directory);

        let present = service
            .image_status(Request::new(api::ImageStatusRequest { image: spec(IMAGE) }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(present.image.unwrap().size, 4);

        let absent = service
            .image_status(Request::new(api::ImageStatusRequest { image: spec(OTHER) }))
            .await
            .unwrap()
            .into_inner();
        assert!(absent.image.is_none());

        let by_url = service
            .image_status(Request::new(api::ImageStatusRequest {
                image: spec("https://example.com/image"),
            }))
            .await
            .unwrap_err();
        assert_eq!(by_url.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn pull_is_refused_or_unimplemented() {
        let directory = tempfile::tempdir().unwrap();
        let service = service(&directory);

        let by_checksum = service
            .pull_image(Request::new(api::PullImageRequest { image: spec(IMAGE) }))
            .await
            .unwrap_err();
        assert_eq!(by_checksum.code(), tonic::Code::InvalidArgument);

        let by_url = service
            .pull_image(Request::new(api::PullImageRequest {
                image: spec("https://example.com/image"),
            }))
            .await
            .unwrap_err();
        assert_eq!(by_url.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn remove_unlinks_and_tolerates_absence() {
        let directory = tempfile::tempdir().unwrap();
        std::fs::write(directory.path().join(IMAGE), b"blob").unwrap();
        let service = service(&directory);

        service
            .remove_image(Request::new(api::RemoveImageRequest { image: spec(IMAGE) }))
            .await
            .unwrap();
        assert!(!directory.path().join(IMAGE).exists());

        // Removing again succeeds.
        service
            .remove_image(Request::new(api::RemoveImageRequest { image: spec(IMAGE) }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn image_fs_info_is_unimplemented() {
        let directory = tempfile::tempdir().unwrap();
        let error = service(&directory)
            .image_fs_info(Request::new(api::ImageFsInfoRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(error.code(), tonic::Code::Unimplemented);
    }
}
