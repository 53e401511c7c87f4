//! パイプの容量を超える出力をしてからブレークポイント行に到達するサンプルプログラム
//! 行番号はネイティブ統合テストから参照される。

fn main() {
    let line = "x".repeat(1000);
    for _ in 0..200 {
        println!("{}", line);
    }
    let done: i64 = 1;
    println!("done = {}", done);
}
