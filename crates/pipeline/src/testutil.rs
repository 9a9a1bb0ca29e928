//! Stand-ins for yt-dlp, ffprobe and ffmpeg used by the tests.
//!
//! Each fake is a POSIX shell script run through `sh`, so nothing needs the
//! executable bit and the real tools never have to be installed.

use media_normalizer_config::ToolConfig;
use std::fs;
use std::path::Path;

/// How the fake yt-dlp behaves.
#[derive(Debug, Clone, Copy)]
pub enum FakeFetch {
    Succeed,
    /// Exit 1 whenever this argument is present
    FailWhen(&'static str),
    AlwaysFail,
    /// Write partial fragments under the request id, then exit 1
    FailLeavingPartial,
}

/// How the fake ffmpeg behaves.
#[derive(Debug, Clone, Copy)]
pub enum FakeEncode {
    /// Write `size` bytes to the output path
    Succeed { size: usize },
    /// Exit 1 whenever this argument is present, otherwise like `Succeed`
    FailWhen { arg: &'static str, size: usize },
    AlwaysFail,
}

fn script_tool(dir: &Path, name: &str, body: &str) -> ToolConfig {
    let path = dir.join(name);
    fs::write(&path, body).expect("write fake tool");
    ToolConfig {
        program: "sh".to_string(),
        prefix_args: vec![path.to_string_lossy().into_owned()],
    }
}

fn fail_clause(fail: Option<&str>) -> String {
    match fail {
        Some(arg) => format!(
            r#"for a in "$@"; do
  if [ "$a" = '{}' ]; then echo "ERROR: refused" >&2; exit 1; fi
done
"#,
            arg
        ),
        None => String::new(),
    }
}

/// Logs each invocation's arguments as one line of `log`, then writes
/// `{id}.{mp3|mp4}` and `{id}.info.json` next to the `-o` template.
/// Failing modes exit before writing the finished files.
pub fn fake_yt_dlp(dir: &Path, log: &Path, mode: FakeFetch, info_json: &str) -> ToolConfig {
    let fail = match mode {
        FakeFetch::Succeed => String::new(),
        FakeFetch::FailWhen(arg) => fail_clause(Some(arg)),
        FakeFetch::AlwaysFail => "echo 'ERROR: Unable to download' >&2\nexit 1\n".to_string(),
        FakeFetch::FailLeavingPartial => concat!(
            "printf 'half' > \"$base.$ext.part\"\n",
            "printf 'frag' > \"$base.f137.webm\"\n",
            "echo 'ERROR: connection reset' >&2\nexit 1\n"
        )
        .to_string(),
    };
    let info_path = dir.join("fake-info.json");
    fs::write(&info_path, info_json).expect("write info json");

    let body = format!(
        r#"printf '%s\n' "$*" >> '{log}'
ext=mp4
out=''
prev=''
for a in "$@"; do
  if [ "$a" = '-x' ]; then ext=mp3; fi
  if [ "$prev" = '-o' ]; then out="$a"; fi
  prev="$a"
done
base="${{out%'.%(ext)s'}}"
{fail}printf 'fake media payload' > "$base.$ext"
cp '{info}' "$base.info.json"
"#,
        log = log.display(),
        fail = fail,
        info = info_path.display(),
    );
    script_tool(dir, "fake-yt-dlp.sh", &body)
}

/// Prints `json` on stdout, ignoring its arguments.
pub fn fake_ffprobe(dir: &Path, json: &str) -> ToolConfig {
    let json_path = dir.join("fake-probe.json");
    fs::write(&json_path, json).expect("write probe json");
    script_tool(dir, "fake-ffprobe.sh", &format!("cat '{}'\n", json_path.display()))
}

/// Logs each invocation's arguments as one line of `log` and writes the
/// last argument (the output path).
pub fn fake_ffmpeg(dir: &Path, log: &Path, mode: FakeEncode) -> ToolConfig {
    let (fail, size) = match mode {
        FakeEncode::Succeed { size } => (String::new(), size),
        FakeEncode::FailWhen { arg, size } => (fail_clause(Some(arg)), size),
        FakeEncode::AlwaysFail => ("echo 'Conversion failed!' >&2\nexit 1\n".to_string(), 0),
    };
    let body = format!(
        r#"printf '%s\n' "$*" >> '{log}'
{fail}out=''
for a in "$@"; do out="$a"; done
head -c {size} /dev/zero > "$out"
"#,
        log = log.display(),
        fail = fail,
        size = size,
    );
    script_tool(dir, "fake-ffmpeg.sh", &body)
}

/// Arguments of every logged invocation, split on whitespace.
pub fn logged_calls(log: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(|l| l.split_whitespace().map(String::from).collect())
        .collect()
}

/// ffprobe JSON for one video and one audio stream.
pub fn probe_json(video_codec: &str, audio_codec: &str) -> String {
    format!(
        r#"{{
  "streams": [
    {{"index": 0, "codec_type": "video", "codec_name": "{}", "width": 1920, "height": 1080, "bit_rate": "2500000", "disposition": {{"default": 1}}}},
    {{"index": 1, "codec_type": "audio", "codec_name": "{}", "channels": 2, "bit_rate": "128000", "disposition": {{"default": 1}}}}
  ],
  "format": {{"bit_rate": "2650000"}}
}}"#,
        video_codec, audio_codec
    )
}
