use std::path::Path;

use tokio::fs;

/// Recursively copies the contents of `src` into `dst`, creating `dst` and
/// any subdirectories as needed. Mirrors Python's
/// `shutil.copytree(src, dst, dirs_exist_ok=True)` used throughout
/// `rhnode/cache.py`.
pub async fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
	fs::create_dir_all(dst).await?;
	let mut entries = fs::read_dir(src).await?;
	while let Some(entry) = entries.next_entry().await? {
		let file_type = entry.file_type().await?;
		let dst_path = dst.join(entry.file_name());
		if file_type.is_dir() {
			Box::pin(copy_dir_all(&entry.path(), &dst_path)).await?;
		} else if file_type.is_file() {
			fs::copy(entry.path(), &dst_path).await?;
		}
	}
	Ok(())
}

/// Counts the number of regular-file descendants, used only for tests and
/// integrity sanity checks.
#[cfg(test)]
pub async fn count_files(dir: &Path) -> std::io::Result<usize> {
	let mut count = 0;
	let mut entries = fs::read_dir(dir).await?;
	while let Some(entry) = entries.next_entry().await? {
		let file_type = entry.file_type().await?;
		if file_type.is_dir() {
			count += Box::pin(count_files(&entry.path())).await?;
		} else {
			count += 1;
		}
	}
	Ok(count)
}
